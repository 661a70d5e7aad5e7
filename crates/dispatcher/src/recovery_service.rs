use std::sync::Arc;

use tracing::{error, info};

use render_core::SchedulerResult;
use render_domain::{TaskStateStore, TaskStatus};

use crate::scheduler::TaskScheduler;

/// 崩溃恢复服务，启动时执行一次
///
/// 启动时仍留在处理中标记集合里的任务，意味着上次执行它的进程
/// 没来得及上报终态就死掉了。唯一安全的恢复方式是从头重新准入：
/// 以最低分数重新入队（先于所有新任务被调度），并经由正常的
/// 状态更新路径回到PENDING。
pub struct RecoveryService {
    state_store: Arc<dyn TaskStateStore>,
    scheduler: Arc<TaskScheduler>,
}

impl RecoveryService {
    pub fn new(state_store: Arc<dyn TaskStateStore>, scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            state_store,
            scheduler,
        }
    }

    /// 恢复之前中断的任务，返回恢复的任务数
    pub async fn recover_processing_tasks(&self) -> SchedulerResult<usize> {
        let processing_ids = self.state_store.processing_task_ids().await?;
        if processing_ids.is_empty() {
            return Ok(0);
        }

        info!("恢复 {} 个中断的任务", processing_ids.len());
        let mut recovered = 0;

        for task_id in processing_ids {
            match self.state_store.get_task(&task_id).await? {
                None => {
                    // 孤儿引用：标记还在但快照已经没了
                    self.state_store.unmark_processing(&task_id).await?;
                }
                Some(task) => {
                    self.scheduler
                        .update_task_status(&task_id, TaskStatus::Pending, None)
                        .await?;
                    self.state_store.enqueue(&task_id, 0).await?;
                    self.state_store.unmark_processing(&task_id).await?;

                    info!("恢复任务[{}] 类型: {}", task_id, task.task_type);
                    recovered += 1;
                }
            }
        }
        Ok(recovered)
    }

    /// 启动入口：恢复失败不阻止系统启动
    pub async fn run_at_startup(&self) {
        match self.recover_processing_tasks().await {
            Ok(0) => {}
            Ok(count) => info!("启动恢复完成，共恢复 {} 个任务", count),
            Err(e) => error!("恢复中断任务时出错: {}", e),
        }
    }
}
