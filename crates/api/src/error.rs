use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use render_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 {id} 不存在"),
                "TASK_NOT_FOUND",
            ),
            ApiError::Scheduler(SchedulerError::ProjectNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("项目 {id} 不存在"),
                "PROJECT_NOT_FOUND",
            ),
            ApiError::Scheduler(SchedulerError::UnsupportedTaskType(task_type)) => (
                StatusCode::BAD_REQUEST,
                format!("不支持的任务类型: {task_type}"),
                "UNSUPPORTED_TASK_TYPE",
            ),
            ApiError::Scheduler(SchedulerError::ValidationError(msg)) => (
                StatusCode::BAD_REQUEST,
                format!("数据验证失败: {msg}"),
                "VALIDATION_ERROR",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
            ),
            ApiError::Scheduler(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
