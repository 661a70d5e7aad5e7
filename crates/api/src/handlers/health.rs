use axum::extract::State;
use axum::response::IntoResponse;

use crate::response::success;
use crate::routes::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    success(serde_json::json!({
        "status": "ok",
        "runningTasks": state.scheduler.current_running(),
    }))
}
