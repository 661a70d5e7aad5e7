use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务日志阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStage {
    Start,
    Processing,
    Completed,
}

impl LogStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStage::Start => "start",
            LogStage::Processing => "processing",
            LogStage::Completed => "completed",
        }
    }
}

/// 一条任务日志
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLogEntry {
    pub stage: LogStage,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl TaskLogEntry {
    pub fn new(stage: LogStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
