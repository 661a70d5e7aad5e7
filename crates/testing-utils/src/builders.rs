//! Test data builders for creating test entities
//!
//! Builder patterns with sensible defaults and easy customization.

use chrono::{DateTime, Utc};
use render_domain::{CallbackParams, Task, TaskStatus, DEFAULT_PRIORITY};
use uuid::Uuid;

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: Uuid::new_v4().to_string(),
                task_type: "render".to_string(),
                project_id: "project-1".to_string(),
                payload: serde_json::json!({"modelName": "chair"}),
                callback: CallbackParams::default(),
                status: TaskStatus::Pending,
                priority: DEFAULT_PRIORITY,
                progress: 0,
                error: None,
                created_at: now,
                updated_at: now,
                started_at: None,
                completed_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_project_id(mut self, project_id: &str) -> Self {
        self.task.project_id = project_id.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_callback(mut self, callback: CallbackParams) -> Self {
        self.task.callback = callback;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_progress(mut self, progress: i32) -> Self {
        self.task.progress = progress;
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.task.updated_at = updated_at;
        self
    }

    pub fn processing(mut self) -> Self {
        self.task.status = TaskStatus::Processing;
        self.task.started_at = Some(self.task.updated_at);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
