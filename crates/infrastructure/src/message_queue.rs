use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Queue,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use render_core::{MessageQueueConfig, SchedulerError, SchedulerResult};
use render_domain::{EventDelivery, MessageQueue, TaskLifecycleEvent};

/// RabbitMQ消息队列实现
///
/// 生命周期事件以持久化投递发布并等待确认；消费侧手动ack，
/// 处理失败nack重新入队，实现至少一次投递。
pub struct RabbitMqMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    config: MessageQueueConfig,
}

impl RabbitMqMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: MessageQueueConfig) -> SchedulerResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::message_queue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::message_queue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            config,
        };

        // 初始化任务事件队列
        {
            let channel = queue.channel.lock().await;
            queue
                .declare_queue(&channel, &queue.config.task_queue, true)
                .await?;
        }

        Ok(queue)
    }

    async fn declare_queue(
        &self,
        channel: &Channel,
        queue_name: &str,
        durable: bool,
    ) -> SchedulerResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::message_queue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::message_queue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMqMessageQueue {
    /// 发布生命周期事件并等待broker确认
    async fn publish_event(
        &self,
        queue: &str,
        event: &TaskLifecycleEvent,
    ) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        let payload = serde_json::to_vec(event)?;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2), // 2 = persistent
            )
            .await
            .map_err(|e| {
                SchedulerError::message_queue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| SchedulerError::message_queue(format!("消息发布确认失败: {e}")))?;

        debug!("事件已发布到队列: {}, 任务ID: {}", queue, event.task_id);
        Ok(())
    }

    /// 拉取一批事件，不在这里ack
    async fn fetch_events(&self, queue: &str, max: usize) -> SchedulerResult<Vec<EventDelivery>> {
        let channel = self.channel.lock().await;
        let mut deliveries = Vec::new();

        while deliveries.len() < max {
            let get_result = channel.basic_get(queue, BasicGetOptions::default()).await;

            match get_result {
                Ok(Some(delivery)) => {
                    match serde_json::from_slice::<TaskLifecycleEvent>(&delivery.data) {
                        Ok(event) => deliveries.push(EventDelivery {
                            event,
                            delivery_tag: delivery.delivery_tag,
                        }),
                        Err(e) => {
                            // 无法解析的消息重投也没有意义，确认后丢弃
                            warn!("丢弃无法解析的消息: {}", e);
                            channel
                                .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                                .await
                                .map_err(|e| {
                                    SchedulerError::message_queue(format!("确认消息失败: {e}"))
                                })?;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let error_msg = e.to_string();
                    // 队列不存在时返回已取到的结果而不是报错
                    if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                        debug!("队列 {} 不存在，返回空结果", queue);
                        break;
                    }
                    return Err(SchedulerError::message_queue(format!(
                        "从队列 {queue} 获取消息失败: {e}"
                    )));
                }
            }
        }

        Ok(deliveries)
    }

    /// 确认消息处理完成
    async fn ack(&self, _queue: &str, delivery_tag: u64) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::message_queue(format!("确认消息失败: {e}")))?;
        Ok(())
    }

    /// 拒绝消息并重新入队
    async fn nack_requeue(&self, _queue: &str, delivery_tag: u64) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SchedulerError::message_queue(format!("拒绝消息失败: {e}")))?;
        Ok(())
    }
}
