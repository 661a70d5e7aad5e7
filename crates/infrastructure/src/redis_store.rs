use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use render_core::{SchedulerError, SchedulerResult};
use render_domain::{Task, TaskStateStore};

/// 待处理任务队列（有序集合，分数=优先级）
const TASK_QUEUE_KEY: &str = "render_task:queue";
/// 处理中任务集合
const TASK_PROCESSING_KEY: &str = "render_task:processing";
/// 任务快照key前缀
const TASK_INFO_PREFIX: &str = "render_task:queue:";

/// Redis快路径状态存储
///
/// 持有权威的在途任务快照和优先级队列。所有调度读写都打到这里，
/// 数据库只做历史与冷启动兜底。
pub struct RedisTaskStore {
    connection: ConnectionManager,
}

impl RedisTaskStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// 按配置的URL建立连接
    pub async fn connect(url: &str) -> SchedulerResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SchedulerError::state_store(format!("Redis地址无效: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| SchedulerError::state_store(format!("连接Redis失败: {e}")))?;

        info!("成功连接到Redis: {}", url);
        Ok(Self::new(connection))
    }

    fn task_key(task_id: &str) -> String {
        format!("{TASK_INFO_PREFIX}{task_id}")
    }
}

#[async_trait]
impl TaskStateStore for RedisTaskStore {
    async fn put_task(&self, task: &Task) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let json = serde_json::to_string(task)?;
        let _: () = con
            .set(Self::task_key(&task.id), json)
            .await
            .map_err(|e| SchedulerError::state_store(format!("写入任务快照失败: {e}")))?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let mut con = self.connection.clone();
        let json: Option<String> = con
            .get(Self::task_key(task_id))
            .await
            .map_err(|e| SchedulerError::state_store(format!("读取任务快照失败: {e}")))?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn enqueue(&self, task_id: &str, score: i32) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let _: () = con
            .zadd(TASK_QUEUE_KEY, task_id, score)
            .await
            .map_err(|e| SchedulerError::state_store(format!("任务入队失败: {e}")))?;
        debug!("任务[{}]已入队, 分数: {}", task_id, score);
        Ok(())
    }

    async fn queue_head(&self, limit: usize) -> SchedulerResult<Vec<String>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con
            .zrangebyscore_limit(TASK_QUEUE_KEY, "-inf", "+inf", 0, limit as isize)
            .await
            .map_err(|e| SchedulerError::state_store(format!("读取队首失败: {e}")))?;
        Ok(ids)
    }

    async fn remove_queued(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut con = self.connection.clone();
        let removed: i64 = con
            .zrem(TASK_QUEUE_KEY, task_id)
            .await
            .map_err(|e| SchedulerError::state_store(format!("任务出队失败: {e}")))?;
        Ok(removed > 0)
    }

    async fn mark_processing(&self, task_id: &str) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let _: () = con
            .sadd(TASK_PROCESSING_KEY, task_id)
            .await
            .map_err(|e| SchedulerError::state_store(format!("写入处理中标记失败: {e}")))?;
        Ok(())
    }

    async fn unmark_processing(&self, task_id: &str) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let _: () = con
            .srem(TASK_PROCESSING_KEY, task_id)
            .await
            .map_err(|e| SchedulerError::state_store(format!("移除处理中标记失败: {e}")))?;
        Ok(())
    }

    async fn processing_task_ids(&self) -> SchedulerResult<Vec<String>> {
        let mut con = self.connection.clone();
        let ids: Vec<String> = con
            .smembers(TASK_PROCESSING_KEY)
            .await
            .map_err(|e| SchedulerError::state_store(format!("读取处理中集合失败: {e}")))?;
        Ok(ids)
    }
}
