use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use render_core::{SchedulerError, SchedulerResult, TaskConfig};
use render_domain::{
    CallbackParams, HandlerRegistry, LogStage, MessageQueue, ProgressSink, Task, TaskAction,
    TaskFilter, TaskHandler, TaskLifecycleEvent, TaskLogStore, TaskOutcome, TaskPatch,
    TaskRepository, TaskStateStore, TaskStatus,
};
use render_infrastructure::MetricsCollector;

/// 创建任务的入参
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub task_type: String,
    pub project_id: String,
    pub payload: serde_json::Value,
    pub callback: CallbackParams,
    pub priority: Option<i32>,
}

/// 调度核心
///
/// 独占任务创建和终态迁移。并发计数和扫描标记是本实例私有的，
/// 只约束本实例派生的进程数；跨实例的状态收敛完全依赖消息总线
/// 上的statusUpdate事件和共享的快路径存储。
pub struct TaskScheduler {
    state_store: Arc<dyn TaskStateStore>,
    task_repo: Arc<dyn TaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    log_store: Arc<dyn TaskLogStore>,
    registry: RwLock<HandlerRegistry>,
    config: TaskConfig,
    task_queue_name: String,
    metrics: Arc<MetricsCollector>,
    /// 本实例正在运行的任务数
    current_running: AtomicI64,
    /// 扫描重入保护
    scanning: AtomicBool,
    scan_signal: Arc<Notify>,
}

impl TaskScheduler {
    pub fn new(
        state_store: Arc<dyn TaskStateStore>,
        task_repo: Arc<dyn TaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        log_store: Arc<dyn TaskLogStore>,
        config: TaskConfig,
        task_queue_name: String,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            state_store,
            task_repo,
            message_queue,
            log_store,
            registry: RwLock::new(HandlerRegistry::new()),
            config,
            task_queue_name,
            metrics,
            current_running: AtomicI64::new(0),
            scanning: AtomicBool::new(false),
            scan_signal: Arc::new(Notify::new()),
        }
    }

    /// 注册任务处理器，未注册的类型在创建时被拒绝
    pub fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type().to_string();
        self.registry.write().unwrap().register(handler);
        info!("已注册任务处理器: {}", task_type);
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn queue_name(&self) -> &str {
        &self.task_queue_name
    }

    pub fn current_running(&self) -> i64 {
        self.current_running.load(Ordering::SeqCst)
    }

    pub fn scan_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.scan_signal)
    }

    /// 请求尽快执行一轮调度扫描
    pub fn trigger_scan(&self) {
        self.scan_signal.notify_one();
    }

    fn available_slots(&self) -> usize {
        let running = self.current_running.load(Ordering::SeqCst);
        (self.config.max_concurrent_tasks as i64 - running).max(0) as usize
    }

    fn release_slot(&self) {
        // 终态事件会在每个实例上被消费，未执行该任务的实例不减到负数
        let _ = self
            .current_running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v - 1).max(0)));
        self.metrics
            .record_running_tasks(self.current_running.load(Ordering::SeqCst));
    }

    /// 创建新任务并入队
    pub async fn create_task(&self, request: CreateTaskRequest) -> SchedulerResult<Task> {
        if !self.registry.read().unwrap().contains(&request.task_type) {
            return Err(SchedulerError::UnsupportedTaskType(request.task_type));
        }

        let task = Task::new(
            request.task_type,
            request.project_id,
            request.payload,
            request.callback,
            request.priority,
        );

        self.state_store.put_task(&task).await?;
        // 以优先级为分数入有序队列，保证按优先级顺序处理
        self.state_store.enqueue(&task.id, task.priority).await?;
        self.persist_best_effort(&task).await;

        self.message_queue
            .publish_event(
                &self.task_queue_name,
                &TaskLifecycleEvent::announce(&task.id, TaskAction::Create),
            )
            .await?;

        info!(
            "创建任务[{}], ID: {}, 优先级: {}",
            task.task_type, task.id, task.priority
        );
        self.append_log(
            &task.id,
            LogStage::Start,
            &format!(
                "创建任务[{}]成功, ID: {}, 优先级: {}",
                task.task_type, task.id, task.priority
            ),
        )
        .await;
        self.metrics.record_task_created(&task.task_type);

        Ok(task)
    }

    /// 查询任务状态：优先读快路径存储，未命中再回落到数据库
    pub async fn get_task(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        if let Some(task) = self.state_store.get_task(task_id).await? {
            return Ok(Some(task));
        }
        self.task_repo.get_task(task_id).await
    }

    /// 分页查询任务历史
    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        skip: i64,
        take: i64,
    ) -> SchedulerResult<(Vec<Task>, i64)> {
        self.task_repo.list_tasks(filter, skip, take).await
    }

    /// 更新任务状态
    ///
    /// 不直接改状态：携带意图时间戳发布statusUpdate事件，所有实例
    /// （包括本实例）从总线消费后走同一条应用路径。
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        patch: Option<TaskPatch>,
    ) -> SchedulerResult<()> {
        let event = TaskLifecycleEvent::status_update(task_id, status, patch, Utc::now());
        self.message_queue
            .publish_event(&self.task_queue_name, &event)
            .await
    }

    /// 更新任务进度
    ///
    /// 快路径存储始终保持最新；数据库只在跨过一个十分位或到达100
    /// 时落盘，避免高频进度回调打爆持久化。
    pub async fn update_task_progress(&self, task_id: &str, progress: i32) -> SchedulerResult<()> {
        let Some(mut task) = self.state_store.get_task(task_id).await? else {
            return Ok(());
        };

        let previous = task.progress;
        task.set_progress(progress, Utc::now());
        self.state_store.put_task(&task).await?;

        if task.progress / 10 != previous / 10 || task.progress == 100 {
            self.persist_best_effort(&task).await;
            info!("任务[{}]进度: {}%", task_id, task.progress);
        }
        Ok(())
    }

    /// 取消任务，只允许取消尚未开始的任务
    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<bool> {
        let Some(task) = self.state_store.get_task(task_id).await? else {
            return Ok(false);
        };

        if task.status != TaskStatus::Pending {
            warn!("无法取消任务[{}]，当前状态: {:?}", task_id, task.status);
            return Ok(false);
        }

        self.state_store.remove_queued(task_id).await?;
        self.update_task_status(
            task_id,
            TaskStatus::Failed,
            Some(TaskPatch::with_error("任务已被取消")),
        )
        .await?;
        self.message_queue
            .publish_event(
                &self.task_queue_name,
                &TaskLifecycleEvent::announce(task_id, TaskAction::Cancel),
            )
            .await?;

        Ok(true)
    }

    /// 应用一条从总线消费到的生命周期事件
    pub async fn apply_lifecycle_event(&self, event: &TaskLifecycleEvent) -> SchedulerResult<()> {
        match event.action {
            TaskAction::StatusUpdate => self.apply_status_update_event(event).await,
            action => {
                debug!("收到通知事件: {:?}, 任务ID: {}", action, event.task_id);
                Ok(())
            }
        }
    }

    /// statusUpdate的幂等应用路径
    ///
    /// 时间戳不新于快照updatedAt的消息直接丢弃；首次进入终态时
    /// 释放本实例一个执行槽、摘掉处理中标记、尽力持久化并触发
    /// 下一轮调度。
    async fn apply_status_update_event(&self, event: &TaskLifecycleEvent) -> SchedulerResult<()> {
        let Some(status) = event.status else {
            warn!("statusUpdate消息缺少status字段, 任务ID: {}", event.task_id);
            return Ok(());
        };

        let Some(mut task) = self.state_store.get_task(&event.task_id).await? else {
            warn!("找不到任务: {}, 忽略消息", event.task_id);
            return Ok(());
        };

        let previous = task.status;
        if !task.apply_status_update(status, event.patch.as_ref(), event.timestamp) {
            debug!(
                "丢弃过期或重复的状态消息, 任务ID: {}, 时间戳: {}",
                event.task_id, event.timestamp
            );
            return Ok(());
        }

        let entered_terminal = task.is_terminal() && !previous.is_terminal();
        if entered_terminal {
            self.state_store.unmark_processing(&task.id).await?;
            self.release_slot();
            self.metrics.record_task_finished(task.status);
        }

        self.state_store.put_task(&task).await?;

        if entered_terminal {
            self.persist_best_effort(&task).await;
            self.trigger_scan();
        }

        info!(
            "任务状态已更新 [{}]: {:?} -> {:?}",
            event.task_id, previous, status
        );
        Ok(())
    }

    /// 扫描队列并准入下一批任务
    ///
    /// 单实例内由scanning标记防止重叠扫描；多实例并发出队是安全的：
    /// 出队后快照缺失的任务直接丢弃，重复的start更新会被幂等规则吸收。
    pub async fn process_next_tasks(&self) -> SchedulerResult<()> {
        if self.available_slots() == 0 {
            return Ok(());
        }
        if self.scanning.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let start = std::time::Instant::now();
        let scan_result = self.scan_queue().await;
        self.scanning.store(false, Ordering::SeqCst);
        self.metrics
            .record_scan_duration(start.elapsed().as_secs_f64());

        let admitted = match scan_result {
            Ok(admitted) => admitted,
            Err(e) => {
                error!("处理下一批任务时出错: {}", e);
                return Ok(());
            }
        };

        // 本轮有准入且仍有空闲槽位时，稍后再扫一轮以排空更低优先级，
        // 不做空转轮询
        if admitted > 0 && self.available_slots() > 0 {
            self.schedule_scan_after(Duration::from_millis(100));
        }
        Ok(())
    }

    async fn scan_queue(&self) -> SchedulerResult<usize> {
        let available = self.available_slots();
        if available == 0 {
            return Ok(0);
        }

        let candidates = self.state_store.queue_head(available).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut admitted = 0;
        for task_id in candidates {
            self.state_store.remove_queued(&task_id).await?;

            let Some(task) = self.state_store.get_task(&task_id).await? else {
                // 出队的id没有对应快照，防御性丢弃
                warn!("队列中的任务[{}]缺少快照，已丢弃", task_id);
                continue;
            };

            self.update_task_status(&task_id, TaskStatus::Processing, None)
                .await?;
            self.state_store.mark_processing(&task_id).await?;
            self.current_running.fetch_add(1, Ordering::SeqCst);
            self.metrics
                .record_running_tasks(self.current_running.load(Ordering::SeqCst));

            self.message_queue
                .publish_event(
                    &self.task_queue_name,
                    &TaskLifecycleEvent::announce(&task_id, TaskAction::Start),
                )
                .await?;

            self.dispatch_execution(task);
            admitted += 1;

            if self.available_slots() == 0 {
                break;
            }
        }
        Ok(admitted)
    }

    /// 异步派发执行，任何失败都不允许冲垮调度循环
    ///
    /// 处理器和超时在派发前解析好，派生任务只携带总线句柄，
    /// 执行结果经由statusUpdate事件回流，终态仍只在应用路径产生。
    fn dispatch_execution(&self, task: Task) {
        let handler = self.registry.read().unwrap().get(&task.task_type);
        let timeout_ms = self.config.timeout_for(&task.task_type);
        let message_queue = Arc::clone(&self.message_queue);
        let queue_name = self.task_queue_name.clone();

        tokio::spawn(async move {
            let task_id = task.id.clone();
            if let Err(e) =
                execute_and_report(handler, timeout_ms, message_queue, queue_name, task).await
            {
                error!("任务执行失败[{}]: {}", task_id, e);
            }
        });
    }

    /// 数据库写入是尽力而为的，失败只记日志，绝不阻塞调度
    async fn persist_best_effort(&self, task: &Task) {
        if let Err(e) = self.task_repo.upsert_task(task).await {
            error!("任务[{}]持久化失败: {}", task.id, e);
        }
    }

    async fn append_log(&self, task_id: &str, stage: LogStage, message: &str) {
        if let Err(e) = self.log_store.append(task_id, stage, message).await {
            warn!("写入任务日志失败[{}]: {}", task_id, e);
        }
    }

    fn schedule_scan_after(&self, delay: Duration) {
        let signal = Arc::clone(&self.scan_signal);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            signal.notify_one();
        });
    }
}

#[async_trait]
impl ProgressSink for TaskScheduler {
    async fn update_progress(&self, task_id: &str, progress: i32) -> SchedulerResult<()> {
        self.update_task_progress(task_id, progress).await
    }
}

/// 执行已准入的任务并把结果转成终态事件
///
/// 处理器调用与超时定时器赛跑；超时、处理器错误都折叠成失败，
/// 以statusUpdate事件发布，由所有实例的应用路径收敛成终态。
async fn execute_and_report(
    handler: Option<Arc<dyn TaskHandler>>,
    timeout_ms: u64,
    message_queue: Arc<dyn MessageQueue>,
    queue_name: String,
    task: Task,
) -> SchedulerResult<()> {
    let Some(handler) = handler else {
        // 类型在创建时校验过，走到这里说明注册表被改过，不重试
        let message = format!("找不到任务类型[{}]的处理器", task.task_type);
        error!("{}", message);
        report_failed(&message_queue, &queue_name, &task.id, message).await?;
        return Ok(());
    };

    let outcome = match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        handler.execute(&task),
    )
    .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => TaskOutcome::failed(format!("任务执行出错: {e}")),
        Err(_) => TaskOutcome::failed(format!("任务执行超时 ({timeout_ms}毫秒)")),
    };

    if outcome.success {
        let patch = TaskPatch {
            progress: Some(100),
            error: None,
            data: merge_payload(&task.payload, outcome.data.as_ref()),
        };
        message_queue
            .publish_event(
                &queue_name,
                &TaskLifecycleEvent::status_update(
                    &task.id,
                    TaskStatus::Completed,
                    Some(patch),
                    Utc::now(),
                ),
            )
            .await?;
        message_queue
            .publish_event(
                &queue_name,
                &TaskLifecycleEvent::announce(&task.id, TaskAction::Complete),
            )
            .await?;
    } else {
        let message = outcome
            .error
            .unwrap_or_else(|| "任务执行失败".to_string());
        report_failed(&message_queue, &queue_name, &task.id, message).await?;
    }
    Ok(())
}

async fn report_failed(
    message_queue: &Arc<dyn MessageQueue>,
    queue_name: &str,
    task_id: &str,
    message: String,
) -> SchedulerResult<()> {
    message_queue
        .publish_event(
            queue_name,
            &TaskLifecycleEvent::status_update(
                task_id,
                TaskStatus::Failed,
                Some(TaskPatch::with_error(message.clone())),
                Utc::now(),
            ),
        )
        .await?;

    let mut event = TaskLifecycleEvent::announce(task_id, TaskAction::Error);
    event.patch = Some(TaskPatch::with_error(message));
    message_queue.publish_event(queue_name, &event).await
}

/// 把执行结果数据合并进任务payload，结果字段优先
fn merge_payload(
    base: &serde_json::Value,
    extra: Option<&serde_json::Value>,
) -> Option<serde_json::Value> {
    let extra = extra?;
    match (base, extra) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(extra_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in extra_map {
                merged.insert(key.clone(), value.clone());
            }
            Some(serde_json::Value::Object(merged))
        }
        _ => Some(extra.clone()),
    }
}
