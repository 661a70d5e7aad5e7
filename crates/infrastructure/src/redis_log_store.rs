use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamRangeReply};
use redis::AsyncCommands;

use render_core::{SchedulerError, SchedulerResult};
use render_domain::{LogStage, TaskLogEntry, TaskLogStore};

const TASK_LOG_PREFIX: &str = "task:logs:";
/// 单个任务日志流的近似上限
const LOG_STREAM_MAXLEN: usize = 1000;

/// 基于Redis Stream的任务日志存储
///
/// 每个任务一条流，XADD追加、XTRIM限长，归档后整条删除。
pub struct RedisTaskLogStore {
    connection: ConnectionManager,
}

impl RedisTaskLogStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn log_key(task_id: &str) -> String {
        format!("{TASK_LOG_PREFIX}{task_id}")
    }

    fn parse_entry(id: &redis::streams::StreamId) -> Option<TaskLogEntry> {
        let stage: String = id.get("stage")?;
        let message: String = id.get("message")?;
        let timestamp: i64 = id.get("timestamp")?;

        let stage = match stage.as_str() {
            "start" => LogStage::Start,
            "processing" => LogStage::Processing,
            "completed" => LogStage::Completed,
            _ => return None,
        };
        let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp)?;

        Some(TaskLogEntry {
            stage,
            message,
            timestamp,
        })
    }
}

#[async_trait]
impl TaskLogStore for RedisTaskLogStore {
    async fn append(&self, task_id: &str, stage: LogStage, message: &str) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let key = Self::log_key(task_id);
        let fields = [
            ("stage", stage.as_str().to_string()),
            ("message", message.to_string()),
            ("timestamp", Utc::now().timestamp_millis().to_string()),
        ];

        let _: String = con
            .xadd(&key, "*", &fields)
            .await
            .map_err(|e| SchedulerError::state_store(format!("追加任务日志失败: {e}")))?;
        let _: () = con
            .xtrim(&key, StreamMaxlen::Approx(LOG_STREAM_MAXLEN))
            .await
            .map_err(|e| SchedulerError::state_store(format!("截断任务日志失败: {e}")))?;
        Ok(())
    }

    async fn range(
        &self,
        task_id: &str,
        count: Option<usize>,
    ) -> SchedulerResult<Vec<TaskLogEntry>> {
        let mut con = self.connection.clone();
        let key = Self::log_key(task_id);

        let reply: StreamRangeReply = match count {
            Some(count) => con
                .xrange_count(&key, "-", "+", count)
                .await
                .map_err(|e| SchedulerError::state_store(format!("读取任务日志失败: {e}")))?,
            None => con
                .xrange(&key, "-", "+")
                .await
                .map_err(|e| SchedulerError::state_store(format!("读取任务日志失败: {e}")))?,
        };

        Ok(reply.ids.iter().filter_map(Self::parse_entry).collect())
    }

    async fn clear(&self, task_id: &str) -> SchedulerResult<()> {
        let mut con = self.connection.clone();
        let _: () = con
            .del(Self::log_key(task_id))
            .await
            .map_err(|e| SchedulerError::state_store(format!("清理任务日志失败: {e}")))?;
        Ok(())
    }
}
