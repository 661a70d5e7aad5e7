use axum::extract::State;
use axum::response::IntoResponse;

use crate::routes::AppState;

/// Prometheus文本格式的指标导出
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
