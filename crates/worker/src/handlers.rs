use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use render_core::{RenderConfig, SchedulerResult, TaskConfig};
use render_domain::{
    ClientCallback, LogArchiver, LogStage, ProgressSink, Task, TaskHandler, TaskLogStore,
    TaskOutcome,
};

use crate::script_executor::ScriptExecutor;
use crate::script_generator::ScriptGenerator;

/// 渲染任务处理器
///
/// 生成脚本 -> 执行 -> 完成动作（归档日志 + 回调前端）。完成动作
/// 无论成败都恰好执行一次；任何失败都折叠进TaskOutcome，不向
/// 调度循环抛错。
pub struct RenderTaskHandler {
    generator: ScriptGenerator,
    executor: ScriptExecutor,
    blender_path: String,
    timeout: Duration,
    progress: Arc<dyn ProgressSink>,
    log_store: Arc<dyn TaskLogStore>,
    archiver: Arc<dyn LogArchiver>,
    callback: Arc<dyn ClientCallback>,
}

impl RenderTaskHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        render_config: &RenderConfig,
        task_config: &TaskConfig,
        executor: ScriptExecutor,
        progress: Arc<dyn ProgressSink>,
        log_store: Arc<dyn TaskLogStore>,
        archiver: Arc<dyn LogArchiver>,
        callback: Arc<dyn ClientCallback>,
    ) -> Self {
        Self {
            generator: ScriptGenerator::new(render_config),
            executor,
            blender_path: render_config.blender_path.clone(),
            timeout: Duration::from_millis(task_config.timeout_for("render")),
            progress,
            log_store,
            archiver,
            callback,
        }
    }

    /// 任务结束后的完成动作：归档日志并回调前端，恰好一次
    async fn complete_task_action(&self, task: &Task) {
        info!(
            "完成任务-回调前端: {}-{}",
            task.id, task.callback.client_id
        );
        if let Err(e) = self
            .log_store
            .append(&task.id, LogStage::Completed, "finished render task completed")
            .await
        {
            warn!("写入任务日志失败[{}]: {}", task.id, e);
        }
        if let Err(e) = self.archiver.archive(&task.id).await {
            error!("归档任务[{}]日志失败: {}", task.id, e);
        }
        self.callback.notify_completed(&task.id, &task.callback).await;
    }
}

#[async_trait]
impl TaskHandler for RenderTaskHandler {
    fn task_type(&self) -> &str {
        "render"
    }

    async fn execute(&self, task: &Task) -> SchedulerResult<TaskOutcome> {
        info!("开始处理渲染任务: {}", task.id);

        let script_path = match self
            .generator
            .create_blender_script(&task.id, &task.payload)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                let message = format!("创建渲染脚本失败: {e}");
                error!("{}", message);
                // 不可恢复的处理错误走单独的错误上报
                self.callback.notify_error(&task.callback, &message).await;
                self.complete_task_action(task).await;
                return Ok(TaskOutcome::failed(message));
            }
        };

        let args = vec![
            "--background".to_string(),
            "--python".to_string(),
            script_path.display().to_string(),
        ];
        let report = self
            .executor
            .execute_command(
                &task.id,
                &self.blender_path,
                &args,
                self.timeout,
                Arc::clone(&self.progress),
            )
            .await;

        if report.is_spawn_error() {
            if let Some(message) = &report.error_message {
                self.callback.notify_error(&task.callback, message).await;
            }
        }

        self.complete_task_action(task).await;

        if report.success {
            info!("渲染任务完成: {}", task.id);
            Ok(TaskOutcome::ok(serde_json::json!({
                "scriptPath": script_path.display().to_string(),
                "logFile": report.log_file.display().to_string(),
                "executionTimeMs": report.execution_time_ms,
                "exitCode": report.exit_code,
            })))
        } else {
            let message = report
                .error_message
                .unwrap_or_else(|| "渲染过程中发生错误".to_string());
            error!("渲染任务失败: {}, 原因: {}", task.id, message);
            Ok(TaskOutcome::failed(message))
        }
    }
}
