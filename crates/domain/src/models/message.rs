use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

/// 生命周期事件动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskAction {
    Create,
    Start,
    StatusUpdate,
    Complete,
    Error,
    Cancel,
}

/// 状态更新消息携带的部分覆盖字段
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    pub progress: Option<i32>,
    pub error: Option<String>,
    pub data: Option<serde_json::Value>,
}

impl TaskPatch {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.error.is_none() && self.data.is_none()
    }
}

/// 任务生命周期事件
///
/// 事件是跨实例传播状态变更的唯一通道。statusUpdate 携带意图时间戳，
/// 所有实例（包括发起者）消费到消息后走同一条应用路径；其余动作只是
/// 通知，不直接驱动状态机。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLifecycleEvent {
    pub task_id: String,
    pub action: TaskAction,
    pub status: Option<TaskStatus>,
    pub patch: Option<TaskPatch>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TaskLifecycleEvent {
    /// 构造一条statusUpdate事件，时间戳即幂等判定依据
    pub fn status_update(
        task_id: impl Into<String>,
        status: TaskStatus,
        patch: Option<TaskPatch>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            action: TaskAction::StatusUpdate,
            status: Some(status),
            patch,
            timestamp,
        }
    }

    /// 构造一条纯通知事件(create/start/complete/error/cancel)
    pub fn announce(task_id: impl Into<String>, action: TaskAction) -> Self {
        Self {
            task_id: task_id.into(),
            action,
            status: None,
            patch: None,
            timestamp: Utc::now(),
        }
    }
}
