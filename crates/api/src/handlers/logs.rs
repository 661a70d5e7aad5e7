use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use render_domain::TaskLogEntry;

use crate::error::{ApiError, ApiResult};
use crate::response::{success, PaginatedResponse};
use crate::routes::AppState;

/// 读取任务日志：优先在线日志流，为空时回落到归档文件
async fn load_entries(state: &AppState, task_id: &str) -> ApiResult<Vec<TaskLogEntry>> {
    let entries = state.log_store.range(task_id, None).await?;
    if !entries.is_empty() {
        return Ok(entries);
    }

    let archive_path = state.log_dir.join(format!("{task_id}.json"));
    match tokio::fs::read_to_string(&archive_path).await {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| ApiError::Internal(format!("解析归档日志失败: {e}"))),
        Err(_) => Ok(vec![]),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub count: Option<usize>,
}

pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut entries = load_entries(&state, &task_id).await?;
    if let Some(count) = query.count {
        entries.truncate(count);
    }
    Ok(success(entries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedLogsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn get_task_logs_paged(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<PagedLogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(100).clamp(1, 1000);

    let entries = load_entries(&state, &task_id).await?;
    let total = entries.len() as i64;
    let page_entries: Vec<TaskLogEntry> = entries
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    Ok(success(PaginatedResponse::new(
        page_entries,
        total,
        page,
        page_size,
    )))
}
