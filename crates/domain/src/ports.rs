use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use render_core::SchedulerResult;

use crate::models::log::{LogStage, TaskLogEntry};
use crate::models::message::TaskLifecycleEvent;
use crate::models::task::{CallbackParams, Task};

/// 快路径状态存储接口
///
/// 持有任务快照、优先级队列和处理中标记。不假设多key事务，
/// 队列项与快照间允许短暂不一致，由调用方防御性处理。
#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// 写入任务快照
    async fn put_task(&self, task: &Task) -> SchedulerResult<()>;

    /// 读取任务快照
    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    /// 按分数入队，分数越小越先被调度
    async fn enqueue(&self, task_id: &str, score: i32) -> SchedulerResult<()>;

    /// 读取队首（分数升序，同分按插入顺序）
    async fn queue_head(&self, limit: usize) -> SchedulerResult<Vec<String>>;

    /// 从队列移除，返回是否存在
    async fn remove_queued(&self, task_id: &str) -> SchedulerResult<bool>;

    /// 加入处理中标记集合
    async fn mark_processing(&self, task_id: &str) -> SchedulerResult<()>;

    /// 移除处理中标记
    async fn unmark_processing(&self, task_id: &str) -> SchedulerResult<()>;

    /// 枚举处理中标记（仅崩溃恢复使用）
    async fn processing_task_ids(&self) -> SchedulerResult<Vec<String>>;
}

/// 一条待确认的事件投递
#[derive(Debug, Clone)]
pub struct EventDelivery {
    pub event: TaskLifecycleEvent,
    pub delivery_tag: u64,
}

/// 消息总线接口，手动确认 + 失败重投
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布生命周期事件
    async fn publish_event(&self, queue: &str, event: &TaskLifecycleEvent)
        -> SchedulerResult<()>;

    /// 拉取一批事件，消费方必须逐条ack或nack
    async fn fetch_events(&self, queue: &str, max: usize) -> SchedulerResult<Vec<EventDelivery>>;

    /// 确认处理完成
    async fn ack(&self, queue: &str, delivery_tag: u64) -> SchedulerResult<()>;

    /// 处理失败，重新入队等待重投
    async fn nack_requeue(&self, queue: &str, delivery_tag: u64) -> SchedulerResult<()>;
}

/// 任务日志流接口
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    async fn append(&self, task_id: &str, stage: LogStage, message: &str) -> SchedulerResult<()>;

    async fn range(&self, task_id: &str, count: Option<usize>)
        -> SchedulerResult<Vec<TaskLogEntry>>;

    async fn clear(&self, task_id: &str) -> SchedulerResult<()>;
}

/// 日志归档接口：把日志流落盘，延迟清理在线缓冲
#[async_trait]
pub trait LogArchiver: Send + Sync {
    async fn archive(&self, task_id: &str) -> SchedulerResult<()>;
}

/// 前端回调接口
#[async_trait]
pub trait ClientCallback: Send + Sync {
    /// 任务结束（无论成败）后通知前端，每个任务恰好一次
    async fn notify_completed(&self, task_id: &str, params: &CallbackParams);

    /// 不可恢复的处理错误单独上报
    async fn notify_error(&self, params: &CallbackParams, error: &str);
}

/// 进度上报接口，执行器通过它回写进度而不直接触碰状态存储
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update_progress(&self, task_id: &str, progress: i32) -> SchedulerResult<()>;
}

/// 任务执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// 任务处理器接口
///
/// 处理器不抛出执行类错误：超时、非零退出、启动失败都折叠进
/// TaskOutcome，由调度核心统一转成终态。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &str;

    async fn execute(&self, task: &Task) -> SchedulerResult<TaskOutcome>;
}

/// 类型化的处理器注册表
///
/// 未注册的任务类型在创建时就被拒绝，而不是等到分发时。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_core::SchedulerResult;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn task_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, _task: &Task) -> SchedulerResult<TaskOutcome> {
            Ok(TaskOutcome::ok(serde_json::json!({"echoed": true})))
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler));

        assert!(registry.contains("echo"));
        assert!(!registry.contains("render"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("render").is_none());
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = TaskOutcome::ok(serde_json::json!(1));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = TaskOutcome::failed("退出码: 1");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("退出码: 1"));
    }
}
