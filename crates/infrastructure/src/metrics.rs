use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use render_core::{SchedulerError, SchedulerResult};
use render_domain::TaskStatus;

/// 调度指标采集
///
/// 薄封装，未安装recorder时所有记录都是空操作，测试无需初始化。
#[derive(Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// 安装Prometheus recorder，返回渲染句柄给/metrics端点
    pub fn install_prometheus() -> SchedulerResult<PrometheusHandle> {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| SchedulerError::Internal(format!("安装指标recorder失败: {e}")))
    }

    pub fn record_task_created(&self, task_type: &str) {
        counter!("render_tasks_created_total", "task_type" => task_type.to_string()).increment(1);
    }

    pub fn record_task_finished(&self, status: TaskStatus) {
        counter!("render_tasks_finished_total", "status" => status.as_str()).increment(1);
    }

    pub fn record_running_tasks(&self, count: i64) {
        gauge!("render_tasks_running").set(count as f64);
    }

    pub fn record_scan_duration(&self, seconds: f64) {
        histogram!("render_admission_scan_duration_seconds").record(seconds);
    }
}
