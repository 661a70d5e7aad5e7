use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use render_dispatcher::TaskScheduler;
use render_domain::TaskLogStore;

use crate::handlers::{health, logs, metrics, tasks};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,
    pub log_store: Arc<dyn TaskLogStore>,
    /// 归档日志目录，在线日志缺失时兜底
    pub log_dir: PathBuf,
    pub metrics_handle: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .route(
            "/api/tasks",
            post(tasks::create_task).get(tasks::list_tasks),
        )
        .route("/api/tasks/{id}", get(tasks::get_task))
        .route("/api/tasks/{id}/cancel", post(tasks::cancel_task))
        .route("/api/tasks/{id}/logs", get(logs::get_task_logs))
        .route("/api/tasks/{id}/logs/paged", get(logs::get_task_logs_paged))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
