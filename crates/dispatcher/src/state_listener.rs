use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use render_core::SchedulerResult;
use render_domain::MessageQueue;

use crate::scheduler::TaskScheduler;

/// 生命周期事件监听器
///
/// 持续从总线拉取事件并交给调度核心的应用路径，处理成功才ack，
/// 失败nack重新入队。至少一次投递下的重复由幂等规则吸收。
pub struct EventListener {
    scheduler: Arc<TaskScheduler>,
    message_queue: Arc<dyn MessageQueue>,
    queue_name: String,
    fetch_batch_size: usize,
    running: Arc<RwLock<bool>>,
}

impl EventListener {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        message_queue: Arc<dyn MessageQueue>,
        queue_name: String,
        fetch_batch_size: usize,
    ) -> Self {
        Self {
            scheduler,
            message_queue,
            queue_name,
            fetch_batch_size,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("事件监听器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 拉取并应用一批事件，返回处理的条数
    pub async fn poll_once(&self) -> SchedulerResult<usize> {
        let deliveries = self
            .message_queue
            .fetch_events(&self.queue_name, self.fetch_batch_size)
            .await?;
        let count = deliveries.len();

        for delivery in deliveries {
            match self.scheduler.apply_lifecycle_event(&delivery.event).await {
                Ok(()) => {
                    self.message_queue
                        .ack(&self.queue_name, delivery.delivery_tag)
                        .await?;
                }
                Err(e) => {
                    error!(
                        "处理事件出错, 任务ID: {}, 重新入队: {}",
                        delivery.event.task_id, e
                    );
                    self.message_queue
                        .nack_requeue(&self.queue_name, delivery.delivery_tag)
                        .await?;
                }
            }
        }
        Ok(count)
    }

    /// 监听循环，直到收到停止信号
    pub async fn run(&self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("开始监听队列: {}", self.queue_name);

        loop {
            if !self.is_running().await {
                info!("收到停止信号，退出队列 {} 的监听", self.queue_name);
                break;
            }

            match self.poll_once().await {
                Ok(0) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("从队列 {} 消费消息时出错: {}", self.queue_name, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Ok(())
    }
}
