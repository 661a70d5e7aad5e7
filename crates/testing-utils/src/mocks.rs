//! Mock implementations for all repository and service traits
//!
//! This module provides in-memory mock implementations that can be used
//! for unit testing without requiring actual Redis, RabbitMQ or database
//! connections.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use render_core::SchedulerResult;
use render_domain::{
    CallbackParams, ClientCallback, EventDelivery, LogArchiver, LogStage, MessageQueue,
    ProgressSink, Task, TaskFilter, TaskHandler, TaskLifecycleEvent, TaskLogEntry, TaskLogStore,
    TaskOutcome, TaskRepository, TaskStateStore,
};

/// In-memory implementation of the fast-path state store.
///
/// The queue keeps `(score, seq, id)` triples so equal scores preserve
/// insertion order, matching the stable priority ordering the scheduler
/// relies on.
#[derive(Default)]
pub struct InMemoryTaskStateStore {
    tasks: Mutex<HashMap<String, Task>>,
    queue: Mutex<Vec<(i32, u64, String)>>,
    processing: Mutex<Vec<String>>,
    next_seq: Mutex<u64>,
}

impl InMemoryTaskStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued_ids(&self) -> Vec<String> {
        let mut queue = self.queue.lock().unwrap().clone();
        queue.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        queue.into_iter().map(|(_, _, id)| id).collect()
    }

    pub fn queue_score(&self, task_id: &str) -> Option<i32> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .find(|(_, _, id)| id == task_id)
            .map(|(score, _, _)| *score)
    }

    pub fn processing_ids(&self) -> Vec<String> {
        self.processing.lock().unwrap().clone()
    }

    /// Drop a snapshot while leaving queue/marker entries behind, to
    /// simulate the brief inconsistency the scheduler must tolerate.
    pub fn remove_snapshot(&self, task_id: &str) {
        self.tasks.lock().unwrap().remove(task_id);
    }
}

#[async_trait]
impl TaskStateStore for InMemoryTaskStateStore {
    async fn put_task(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks
            .lock()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(task_id).cloned())
    }

    async fn enqueue(&self, task_id: &str, score: i32) -> SchedulerResult<()> {
        let mut queue = self.queue.lock().unwrap();
        // ZADD语义：已存在的成员只更新分数
        if let Some(entry) = queue.iter_mut().find(|(_, _, id)| id == task_id) {
            entry.0 = score;
            return Ok(());
        }
        let mut seq = self.next_seq.lock().unwrap();
        *seq += 1;
        queue.push((score, *seq, task_id.to_string()));
        Ok(())
    }

    async fn queue_head(&self, limit: usize) -> SchedulerResult<Vec<String>> {
        let mut queue = self.queue.lock().unwrap().clone();
        queue.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Ok(queue
            .into_iter()
            .take(limit)
            .map(|(_, _, id)| id)
            .collect())
    }

    async fn remove_queued(&self, task_id: &str) -> SchedulerResult<bool> {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|(_, _, id)| id != task_id);
        Ok(queue.len() != before)
    }

    async fn mark_processing(&self, task_id: &str) -> SchedulerResult<()> {
        let mut processing = self.processing.lock().unwrap();
        if !processing.iter().any(|id| id == task_id) {
            processing.push(task_id.to_string());
        }
        Ok(())
    }

    async fn unmark_processing(&self, task_id: &str) -> SchedulerResult<()> {
        self.processing.lock().unwrap().retain(|id| id != task_id);
        Ok(())
    }

    async fn processing_task_ids(&self) -> SchedulerResult<Vec<String>> {
        Ok(self.processing.lock().unwrap().clone())
    }
}

/// In-memory durable store mock.
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: Mutex<HashMap<String, Task>>,
    projects: Mutex<HashSet<String>>,
    enforce_projects: Mutex<bool>,
    fail_writes: Mutex<bool>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict `project_exists` to the given ids.
    pub fn with_projects(projects: &[&str]) -> Self {
        let repo = Self::default();
        *repo.enforce_projects.lock().unwrap() = true;
        let mut set = repo.projects.lock().unwrap();
        for p in projects {
            set.insert(p.to_string());
        }
        drop(set);
        repo
    }

    /// Make every write fail, for exercising the best-effort path.
    pub fn fail_writes(&self) {
        *self.fail_writes.lock().unwrap() = true;
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn stored(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn upsert_task(&self, task: &Task) -> SchedulerResult<()> {
        if *self.fail_writes.lock().unwrap() {
            return Err(render_core::SchedulerError::DatabaseOperation(
                "模拟的数据库写入失败".to_string(),
            ));
        }
        self.tasks
            .lock()
            .unwrap()
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(task_id).cloned())
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        skip: i64,
        take: i64,
    ) -> SchedulerResult<(Vec<Task>, i64)> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| {
                filter
                    .task_type
                    .as_ref()
                    .map(|ty| &t.task_type == ty)
                    .unwrap_or(true)
                    && filter.status.map(|s| t.status == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.created_at.cmp(&a.created_at))
        });
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(take.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn project_exists(&self, project_id: &str) -> SchedulerResult<bool> {
        if !*self.enforce_projects.lock().unwrap() {
            return Ok(true);
        }
        Ok(self.projects.lock().unwrap().contains(project_id))
    }
}

struct QueueState {
    pending: VecDeque<(u64, TaskLifecycleEvent)>,
    unacked: HashMap<u64, TaskLifecycleEvent>,
}

/// In-memory message bus with manual-ack semantics.
#[derive(Default)]
pub struct InMemoryMessageQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: Mutex<u64>,
    published: Mutex<Vec<TaskLifecycleEvent>>,
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event ever published, in publish order.
    pub fn published_events(&self) -> Vec<TaskLifecycleEvent> {
        self.published.lock().unwrap().clone()
    }

    pub fn pending_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    pub fn unacked_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_event(
        &self,
        queue: &str,
        event: &TaskLifecycleEvent,
    ) -> SchedulerResult<()> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_insert_with(|| QueueState {
            pending: VecDeque::new(),
            unacked: HashMap::new(),
        });
        let mut tag = self.next_tag.lock().unwrap();
        *tag += 1;
        state.pending.push_back((*tag, event.clone()));
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn fetch_events(&self, queue: &str, max: usize) -> SchedulerResult<Vec<EventDelivery>> {
        let mut queues = self.queues.lock().unwrap();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(vec![]);
        };
        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some((tag, event)) = state.pending.pop_front() else {
                break;
            };
            state.unacked.insert(tag, event.clone());
            deliveries.push(EventDelivery {
                event,
                delivery_tag: tag,
            });
        }
        Ok(deliveries)
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> SchedulerResult<()> {
        if let Some(state) = self.queues.lock().unwrap().get_mut(queue) {
            state.unacked.remove(&delivery_tag);
        }
        Ok(())
    }

    async fn nack_requeue(&self, queue: &str, delivery_tag: u64) -> SchedulerResult<()> {
        if let Some(state) = self.queues.lock().unwrap().get_mut(queue) {
            if let Some(event) = state.unacked.remove(&delivery_tag) {
                state.pending.push_front((delivery_tag, event));
            }
        }
        Ok(())
    }
}

/// In-memory task log stream.
#[derive(Default)]
pub struct InMemoryTaskLogStore {
    logs: Mutex<HashMap<String, Vec<TaskLogEntry>>>,
}

impl InMemoryTaskLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, task_id: &str) -> Vec<TaskLogEntry> {
        self.logs
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskLogStore for InMemoryTaskLogStore {
    async fn append(&self, task_id: &str, stage: LogStage, message: &str) -> SchedulerResult<()> {
        self.logs
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push(TaskLogEntry::new(stage, message));
        Ok(())
    }

    async fn range(
        &self,
        task_id: &str,
        count: Option<usize>,
    ) -> SchedulerResult<Vec<TaskLogEntry>> {
        let logs = self.logs.lock().unwrap();
        let entries = logs.get(task_id).cloned().unwrap_or_default();
        Ok(match count {
            Some(n) => entries.into_iter().take(n).collect(),
            None => entries,
        })
    }

    async fn clear(&self, task_id: &str) -> SchedulerResult<()> {
        self.logs.lock().unwrap().remove(task_id);
        Ok(())
    }
}

/// No-op archiver.
#[derive(Default)]
pub struct NoopArchiver {
    archived: Mutex<Vec<String>>,
}

impl NoopArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archived_ids(&self) -> Vec<String> {
        self.archived.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogArchiver for NoopArchiver {
    async fn archive(&self, task_id: &str) -> SchedulerResult<()> {
        self.archived.lock().unwrap().push(task_id.to_string());
        Ok(())
    }
}

/// Records callback invocations instead of performing HTTP requests.
#[derive(Default)]
pub struct NoopClientCallback {
    completed: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl NoopClientCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_ids(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn reported_errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientCallback for NoopClientCallback {
    async fn notify_completed(&self, task_id: &str, _params: &CallbackParams) {
        self.completed.lock().unwrap().push(task_id.to_string());
    }

    async fn notify_error(&self, _params: &CallbackParams, error: &str) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Records progress updates instead of touching a state store.
#[derive(Default)]
pub struct RecordingProgressSink {
    updates: Mutex<Vec<(String, i32)>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, i32)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn progress_values(&self, task_id: &str) -> Vec<i32> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgressSink {
    async fn update_progress(&self, task_id: &str, progress: i32) -> SchedulerResult<()> {
        self.updates
            .lock()
            .unwrap()
            .push((task_id.to_string(), progress));
        Ok(())
    }
}

/// Handler that records execution order and returns a configurable outcome.
pub struct RecordingHandler {
    task_type: String,
    delay: Duration,
    executed: Arc<Mutex<Vec<String>>>,
    failures: Mutex<HashMap<String, String>>,
    hang: Mutex<bool>,
}

impl RecordingHandler {
    pub fn new(task_type: &str) -> Self {
        Self {
            task_type: task_type.to_string(),
            delay: Duration::from_millis(0),
            executed: Arc::new(Mutex::new(Vec::new())),
            failures: Mutex::new(HashMap::new()),
            hang: Mutex::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the handler report failure for the given task id.
    pub fn fail_task(&self, task_id: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(task_id.to_string(), error.to_string());
    }

    /// Make the handler never settle, for timeout tests.
    pub fn hang_forever(&self) {
        *self.hang.lock().unwrap() = true;
    }

    pub fn executed_ids(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    async fn execute(&self, task: &Task) -> SchedulerResult<TaskOutcome> {
        self.executed.lock().unwrap().push(task.id.clone());
        if *self.hang.lock().unwrap() {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().unwrap().get(&task.id).cloned();
        Ok(match failure {
            Some(error) => TaskOutcome::failed(error),
            None => TaskOutcome::ok(serde_json::json!({"handled": true})),
        })
    }
}
