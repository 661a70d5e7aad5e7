use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};

use render_core::{SchedulerError, SchedulerResult};
use render_domain::{LogArchiver, TaskLogStore};

/// 在线日志缓冲清理前的宽限时间
const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(10);

/// 文件日志归档器
///
/// 把任务的日志流整体写成一个JSON文件，宽限期过后再清掉Redis里
/// 的在线缓冲，给仍在读实时日志的调用方留出窗口。
pub struct FileLogArchiver {
    log_store: Arc<dyn TaskLogStore>,
    log_dir: PathBuf,
    cleanup_delay: Duration,
}

impl FileLogArchiver {
    pub fn new(log_store: Arc<dyn TaskLogStore>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_store,
            log_dir: log_dir.into(),
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    pub fn archive_path(&self, task_id: &str) -> PathBuf {
        self.log_dir.join(format!("{task_id}.json"))
    }
}

#[async_trait]
impl LogArchiver for FileLogArchiver {
    async fn archive(&self, task_id: &str) -> SchedulerResult<()> {
        let entries = self.log_store.range(task_id, None).await?;

        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .map_err(|e| SchedulerError::Internal(format!("创建日志目录失败: {e}")))?;

        let path = self.archive_path(task_id);
        let json = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| SchedulerError::Internal(format!("写入日志归档失败: {e}")))?;

        info!("任务[{}]日志已归档到 {}", task_id, path.display());

        let log_store = Arc::clone(&self.log_store);
        let task_id = task_id.to_string();
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = log_store.clear(&task_id).await {
                error!("清理任务[{}]在线日志失败: {}", task_id, e);
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_domain::LogStage;
    use render_testing_utils::InMemoryTaskLogStore;

    #[tokio::test]
    async fn test_archive_writes_file_and_clears_after_delay() {
        let log_store = Arc::new(InMemoryTaskLogStore::new());
        log_store
            .append("task-1", LogStage::Start, "创建任务成功")
            .await
            .unwrap();
        log_store
            .append("task-1", LogStage::Completed, "渲染完成")
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let archiver = FileLogArchiver::new(log_store.clone(), dir.path())
            .with_cleanup_delay(Duration::from_millis(10));

        archiver.archive("task-1").await.unwrap();

        let content = std::fs::read_to_string(archiver.archive_path("task-1")).unwrap();
        assert!(content.contains("渲染完成"));

        // 宽限期过后在线缓冲被清空
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(log_store.entries("task-1").is_empty());
    }

    #[tokio::test]
    async fn test_archive_empty_stream_still_writes_file() {
        let log_store = Arc::new(InMemoryTaskLogStore::new());
        let dir = tempfile::tempdir().unwrap();
        let archiver = FileLogArchiver::new(log_store, dir.path())
            .with_cleanup_delay(Duration::from_millis(10));

        archiver.archive("missing-task").await.unwrap();
        assert!(archiver.archive_path("missing-task").exists());
    }
}
