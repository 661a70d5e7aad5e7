use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::TaskPatch;

/// 默认优先级，数字越小优先级越高
pub const DEFAULT_PRIORITY: i32 = 10;

/// 任务状态机
///
/// PENDING -> PROCESSING -> COMPLETED | FAILED
/// PENDING -> FAILED (取消)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("未知的任务状态: {other}")),
        }
    }
}

/// 回调参数，任务完成后回调前端时使用
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub client_id: String,
    pub client_jwt: String,
    pub file_data_id: Option<String>,
}

/// 渲染任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub project_id: String,
    /// 渲染参数，由脚本生成器解释，调度器不关心内容
    pub payload: serde_json::Value,
    pub callback: CallbackParams,
    pub status: TaskStatus,
    pub priority: i32,
    /// 执行进度 0-100
    pub progress: i32,
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        project_id: impl Into<String>,
        payload: serde_json::Value,
        callback: CallbackParams,
        priority: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            project_id: project_id.into(),
            payload,
            callback,
            status: TaskStatus::Pending,
            priority: priority.unwrap_or(DEFAULT_PRIORITY),
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 幂等地应用一次状态更新
    ///
    /// 时间戳不比 updated_at 新的消息视为过期或重复，直接丢弃；
    /// 终态任务不再接受任何迁移。startedAt/completedAt 只在首次进入
    /// 对应状态时落章，之后不再被覆盖。
    ///
    /// 返回 true 表示本次更新生效。
    pub fn apply_status_update(
        &mut self,
        status: TaskStatus,
        patch: Option<&TaskPatch>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        if timestamp <= self.updated_at {
            return false;
        }
        if self.status.is_terminal() {
            return false;
        }

        if let Some(patch) = patch {
            if let Some(progress) = patch.progress {
                self.progress = progress.clamp(0, 100);
            }
            if let Some(error) = &patch.error {
                self.error = Some(error.clone());
            }
            if let Some(data) = &patch.data {
                self.payload = data.clone();
            }
        }

        if status == TaskStatus::Processing && self.started_at.is_none() {
            self.started_at = Some(timestamp);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(timestamp);
        }

        self.status = status;
        self.updated_at = timestamp;
        true
    }

    /// 更新进度，限制在 0-100
    pub fn set_progress(&mut self, progress: i32, timestamp: DateTime<Utc>) {
        self.progress = progress.clamp(0, 100);
        self.updated_at = timestamp;
    }
}

/// 任务列表查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskFilter {
    pub task_type: Option<String>,
    pub status: Option<TaskStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn render_task() -> Task {
        Task::new(
            "render",
            "project-1",
            json!({"modelName": "chair"}),
            CallbackParams::default(),
            None,
        )
    }

    #[test]
    fn test_new_task_defaults() {
        let task = render_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.progress, 0);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_stale_timestamp_is_noop() {
        let mut task = render_task();
        let stale = task.updated_at - Duration::milliseconds(1);
        let before = task.clone();

        assert!(!task.apply_status_update(TaskStatus::Processing, None, stale));
        assert!(!task.apply_status_update(TaskStatus::Processing, None, task.updated_at));
        assert_eq!(task, before);
    }

    #[test]
    fn test_duplicate_event_applies_once() {
        let mut task = render_task();
        let ts = task.updated_at + Duration::milliseconds(5);

        assert!(task.apply_status_update(TaskStatus::Processing, None, ts));
        let started = task.started_at;
        // 同一时间戳的重复消息是空操作
        assert!(!task.apply_status_update(TaskStatus::Processing, None, ts));
        assert_eq!(task.started_at, started);
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[test]
    fn test_started_at_set_once() {
        let mut task = render_task();
        let t1 = task.updated_at + Duration::milliseconds(5);
        let t2 = t1 + Duration::milliseconds(5);

        assert!(task.apply_status_update(TaskStatus::Processing, None, t1));
        assert_eq!(task.started_at, Some(t1));

        // 之后的更新不再改写startedAt
        assert!(task.apply_status_update(TaskStatus::Processing, None, t2));
        assert_eq!(task.started_at, Some(t1));
    }

    #[test]
    fn test_completed_at_set_once_and_terminal_absorbs() {
        let mut task = render_task();
        let t1 = task.updated_at + Duration::milliseconds(5);
        let t2 = t1 + Duration::milliseconds(5);
        let t3 = t2 + Duration::milliseconds(5);

        assert!(task.apply_status_update(TaskStatus::Processing, None, t1));
        assert!(task.apply_status_update(TaskStatus::Completed, None, t2));
        assert_eq!(task.completed_at, Some(t2));

        // 终态任务拒绝后续迁移
        assert!(!task.apply_status_update(TaskStatus::Failed, None, t3));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(t2));
    }

    #[test]
    fn test_cancel_path_pending_to_failed() {
        let mut task = render_task();
        let ts = task.updated_at + Duration::milliseconds(5);
        let patch = TaskPatch {
            error: Some("任务已被取消".to_string()),
            ..Default::default()
        };

        assert!(task.apply_status_update(TaskStatus::Failed, Some(&patch), ts));
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("任务已被取消"));
        assert_eq!(task.completed_at, Some(ts));
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_patch_merges_progress_and_data() {
        let mut task = render_task();
        let ts = task.updated_at + Duration::milliseconds(5);
        let patch = TaskPatch {
            progress: Some(250),
            data: Some(json!({"modelName": "chair", "logFile": "/logs/x.log"})),
            ..Default::default()
        };

        assert!(task.apply_status_update(TaskStatus::Completed, Some(&patch), ts));
        assert_eq!(task.progress, 100); // 超界值被钳制
        assert_eq!(task.payload["logFile"], "/logs/x.log");
    }

    #[test]
    fn test_set_progress_clamps() {
        let mut task = render_task();
        let ts = task.updated_at + Duration::milliseconds(5);
        task.set_progress(-5, ts);
        assert_eq!(task.progress, 0);
        task.set_progress(150, ts);
        assert_eq!(task.progress, 100);
        task.set_progress(42, ts);
        assert_eq!(task.progress, 42);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        let status: TaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, TaskStatus::Failed);
    }

    #[test]
    fn test_task_roundtrip_with_millisecond_timestamps() {
        let task = render_task();
        let json = serde_json::to_value(&task).unwrap();
        assert!(json["created_at"].is_i64());

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, task.status);
    }
}
