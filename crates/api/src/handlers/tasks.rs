use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use render_dispatcher::CreateTaskRequest;
use render_domain::{CallbackParams, TaskFilter, TaskStatus};

use crate::error::{ApiError, ApiResult};
use crate::response::{created, success, PaginatedResponse};
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    #[serde(default = "default_task_type")]
    pub task_type: String,
    pub project_id: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_jwt: String,
    pub file_data_id: Option<String>,
    pub priority: Option<i32>,
}

fn default_task_type() -> String {
    "render".to_string()
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> ApiResult<impl IntoResponse> {
    if body.project_id.trim().is_empty() {
        return Err(ApiError::BadRequest("projectId 不能为空".to_string()));
    }

    let task = state
        .scheduler
        .create_task(CreateTaskRequest {
            task_type: body.task_type,
            project_id: body.project_id,
            payload: body.payload,
            callback: CallbackParams {
                client_id: body.client_id,
                client_jwt: body.client_jwt,
                file_data_id: body.file_data_id,
            },
            priority: body.priority,
        })
        .await?;

    Ok(created(task))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .scheduler
        .get_task(&task_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(success(task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub task_type: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<TaskStatus>().map_err(ApiError::BadRequest))
        .transpose()?;

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);

    let filter = TaskFilter {
        task_type: query.task_type,
        status,
    };
    let (tasks, total) = state
        .scheduler
        .list_tasks(&filter, (page - 1) * page_size, page_size)
        .await?;

    Ok(success(PaginatedResponse::new(tasks, total, page, page_size)))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.scheduler.cancel_task(&task_id).await?;
    Ok(success(serde_json::json!({ "cancelled": cancelled })))
}
