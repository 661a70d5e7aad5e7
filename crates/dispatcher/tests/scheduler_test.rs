use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use render_core::{SchedulerError, TaskConfig, TaskTypeConfig};
use render_dispatcher::{CreateTaskRequest, EventListener, TaskScheduler};
use render_domain::{CallbackParams, TaskAction, TaskRepository, TaskStateStore, TaskStatus};
use render_infrastructure::MetricsCollector;
use render_testing_utils::{
    InMemoryMessageQueue, InMemoryTaskLogStore, InMemoryTaskRepository, InMemoryTaskStateStore,
    RecordingHandler,
};

const QUEUE: &str = "tasks";

struct Fixture {
    scheduler: Arc<TaskScheduler>,
    state_store: Arc<InMemoryTaskStateStore>,
    task_repo: Arc<InMemoryTaskRepository>,
    message_queue: Arc<InMemoryMessageQueue>,
    listener: EventListener,
    handler: Arc<RecordingHandler>,
}

fn fixture(max_concurrent: usize) -> Fixture {
    fixture_with_handler(max_concurrent, Arc::new(RecordingHandler::new("echo")))
}

fn fixture_with_handler(max_concurrent: usize, handler: Arc<RecordingHandler>) -> Fixture {
    let mut task_config = TaskConfig::default();
    task_config.max_concurrent_tasks = max_concurrent;
    task_config.task_types.insert(
        "echo".to_string(),
        TaskTypeConfig {
            timeout_ms: Some(500),
        },
    );

    let state_store = Arc::new(InMemoryTaskStateStore::new());
    let task_repo = Arc::new(InMemoryTaskRepository::new());
    let message_queue = Arc::new(InMemoryMessageQueue::new());
    let log_store = Arc::new(InMemoryTaskLogStore::new());

    let scheduler = Arc::new(TaskScheduler::new(
        state_store.clone(),
        task_repo.clone(),
        message_queue.clone(),
        log_store,
        task_config,
        QUEUE.to_string(),
        Arc::new(MetricsCollector::new()),
    ));
    scheduler.register_handler(handler.clone());

    let listener = EventListener::new(scheduler.clone(), message_queue.clone(), QUEUE.to_string(), 16);

    Fixture {
        scheduler,
        state_store,
        task_repo,
        message_queue,
        listener,
        handler,
    }
}

fn echo_request(priority: Option<i32>) -> CreateTaskRequest {
    CreateTaskRequest {
        task_type: "echo".to_string(),
        project_id: "project-1".to_string(),
        payload: json!({"modelName": "chair"}),
        callback: CallbackParams::default(),
        priority,
    }
}

/// 排空总线上的全部事件（应用过程中可能再发新事件，循环到没有为止）
async fn drain(f: &Fixture) {
    loop {
        let processed = f.listener.poll_once().await.unwrap();
        if processed == 0 {
            break;
        }
    }
}

/// 等派生的执行任务结束并把产生的事件全部应用掉
async fn settle(f: &Fixture) {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        drain(f).await;
    }
}

#[tokio::test]
async fn test_create_task_rejects_unknown_type() {
    let f = fixture(1);
    let mut request = echo_request(None);
    request.task_type = "transcode".to_string();

    let result = f.scheduler.create_task(request).await;
    assert!(matches!(
        result,
        Err(SchedulerError::UnsupportedTaskType(t)) if t == "transcode"
    ));
    // 校验失败的任务既不入队也不持久化
    assert!(f.state_store.queued_ids().is_empty());
    assert_eq!(f.task_repo.count(), 0);
}

#[tokio::test]
async fn test_create_task_snapshots_queues_and_announces() {
    let f = fixture(1);
    let task = f.scheduler.create_task(echo_request(Some(3))).await.unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 3);

    // 快照、队列项、持久化记录各就各位
    let snapshot = f.state_store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Pending);
    assert_eq!(f.state_store.queue_score(&task.id), Some(3));
    assert!(f.task_repo.stored(&task.id).is_some());

    let events = f.message_queue.published_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, TaskAction::Create);
    assert_eq!(events[0].task_id, task.id);
}

#[tokio::test]
async fn test_create_task_defaults_priority() {
    let f = fixture(1);
    let task = f.scheduler.create_task(echo_request(None)).await.unwrap();
    assert_eq!(task.priority, render_domain::DEFAULT_PRIORITY);
}

#[tokio::test]
async fn test_durable_write_failure_does_not_block_creation() {
    let f = fixture(1);
    f.task_repo.fail_writes();

    let task = f.scheduler.create_task(echo_request(None)).await.unwrap();
    // 数据库挂了也能创建成功，快路径是调度的真实来源
    assert!(f.state_store.get_task(&task.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_get_task_falls_back_to_durable_store() {
    let f = fixture(1);
    let task = render_testing_utils::TaskBuilder::new()
        .with_id("cold-task")
        .with_status(TaskStatus::Completed)
        .build();
    f.task_repo.upsert_task(&task).await.unwrap();

    let found = f.scheduler.get_task("cold-task").await.unwrap().unwrap();
    assert_eq!(found.status, TaskStatus::Completed);
    assert!(f.scheduler.get_task("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_before_admission() {
    // 并发上限0：什么都不会被准入
    let f = fixture(0);
    let task = f.scheduler.create_task(echo_request(Some(10))).await.unwrap();

    let cancelled = f.scheduler.cancel_task(&task.id).await.unwrap();
    assert!(cancelled);
    // 队列不再包含该任务
    assert!(f.state_store.queued_ids().is_empty());

    drain(&f).await;
    let task = f.scheduler.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("任务已被取消"));
    assert!(task.completed_at.is_some());

    // 终态任务不能再取消
    assert!(!f.scheduler.cancel_task(&task.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_unknown_task_returns_false() {
    let f = fixture(1);
    assert!(!f.scheduler.cancel_task("no-such-task").await.unwrap());
}

#[tokio::test]
async fn test_priority_order_admission() {
    let f = fixture(1);

    let t5 = f.scheduler.create_task(echo_request(Some(5))).await.unwrap();
    let t1 = f.scheduler.create_task(echo_request(Some(1))).await.unwrap();
    let t3 = f.scheduler.create_task(echo_request(Some(3))).await.unwrap();

    // 上限1，每轮准入一个，按优先级1,3,5依次执行
    for _ in 0..3 {
        f.scheduler.process_next_tasks().await.unwrap();
        settle(&f).await;
    }

    assert_eq!(
        f.handler.executed_ids(),
        vec![t1.id.clone(), t3.id.clone(), t5.id.clone()]
    );
    for id in [&t1.id, &t3.id, &t5.id] {
        let task = f.scheduler.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn test_equal_priority_fifo_tie_break() {
    let f = fixture(1);
    let first = f.scheduler.create_task(echo_request(Some(5))).await.unwrap();
    let second = f.scheduler.create_task(echo_request(Some(5))).await.unwrap();

    for _ in 0..2 {
        f.scheduler.process_next_tasks().await.unwrap();
        settle(&f).await;
    }

    assert_eq!(f.handler.executed_ids(), vec![first.id, second.id]);
}

#[tokio::test]
async fn test_create_and_drain_reaches_terminal_state() {
    let f = fixture(1);
    let task = f.scheduler.create_task(echo_request(Some(10))).await.unwrap();

    f.scheduler.process_next_tasks().await.unwrap();
    settle(&f).await;

    let task = f.scheduler.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    // 处理中标记清空，槽位全部归还
    assert!(f.state_store.processing_ids().is_empty());
    assert_eq!(f.scheduler.current_running(), 0);
    // 终态持久化到数据库
    assert_eq!(
        f.task_repo.stored(&task.id).unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_handler_failure_becomes_failed_state() {
    let handler = Arc::new(RecordingHandler::new("echo"));
    let f = fixture_with_handler(1, handler.clone());
    let task = f.scheduler.create_task(echo_request(None)).await.unwrap();
    handler.fail_task(&task.id, "渲染器崩溃");

    f.scheduler.process_next_tasks().await.unwrap();
    settle(&f).await;

    let task = f.scheduler.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("渲染器崩溃"));
    assert_eq!(f.scheduler.current_running(), 0);

    // 失败路径发布error通知
    assert!(f
        .message_queue
        .published_events()
        .iter()
        .any(|e| e.action == TaskAction::Error && e.task_id == task.id));
}

#[tokio::test]
async fn test_hanging_handler_times_out() {
    let handler = Arc::new(RecordingHandler::new("echo"));
    handler.hang_forever();
    let f = fixture_with_handler(1, handler);
    let task = f.scheduler.create_task(echo_request(None)).await.unwrap();

    f.scheduler.process_next_tasks().await.unwrap();
    // echo类型超时配置为500ms
    tokio::time::sleep(Duration::from_millis(700)).await;
    drain(&f).await;

    let task = f.scheduler.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("超时"));
    assert_eq!(f.scheduler.current_running(), 0);
}

#[tokio::test]
async fn test_dequeued_id_without_snapshot_is_dropped() {
    let f = fixture(2);
    // 队列里有一个没有快照的id（两个存储之间的短暂不一致）
    f.state_store.enqueue("ghost", 1).await.unwrap();
    let task = f.scheduler.create_task(echo_request(Some(5))).await.unwrap();

    f.scheduler.process_next_tasks().await.unwrap();
    settle(&f).await;

    // 幽灵id被丢弃，正常任务不受影响
    assert!(f.state_store.queued_ids().is_empty());
    assert_eq!(f.handler.executed_ids(), vec![task.id.clone()]);
    let task = f.scheduler.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_ceiling_bounds_concurrent_admissions() {
    let handler = Arc::new(RecordingHandler::new("echo").with_delay(Duration::from_millis(200)));
    let f = fixture_with_handler(1, handler.clone());

    f.scheduler.create_task(echo_request(Some(1))).await.unwrap();
    f.scheduler.create_task(echo_request(Some(2))).await.unwrap();

    f.scheduler.process_next_tasks().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    drain(&f).await;
    // 第一个还在执行，第二个不能被准入
    f.scheduler.process_next_tasks().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(f.handler.executed_ids().len(), 1);
    assert_eq!(f.scheduler.current_running(), 1);

    settle(&f).await;
    f.scheduler.process_next_tasks().await.unwrap();
    settle(&f).await;
    assert_eq!(f.handler.executed_ids().len(), 2);
    assert_eq!(f.scheduler.current_running(), 0);
}

#[tokio::test]
async fn test_progress_updates_clamp_and_throttle_persistence() {
    let f = fixture(1);
    let task = f.scheduler.create_task(echo_request(None)).await.unwrap();
    let persisted_at_create = f.task_repo.stored(&task.id).unwrap();
    assert_eq!(persisted_at_create.progress, 0);

    // 同一个十分位内的进度只更新快照，不落库
    f.scheduler.update_task_progress(&task.id, 5).await.unwrap();
    assert_eq!(
        f.state_store.get_task(&task.id).await.unwrap().unwrap().progress,
        5
    );
    assert_eq!(f.task_repo.stored(&task.id).unwrap().progress, 0);

    // 跨十分位落库
    f.scheduler.update_task_progress(&task.id, 15).await.unwrap();
    assert_eq!(f.task_repo.stored(&task.id).unwrap().progress, 15);

    // 钳制到0-100，100必落库
    f.scheduler.update_task_progress(&task.id, 150).await.unwrap();
    let snapshot = f.state_store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(snapshot.progress, 100);
    assert_eq!(f.task_repo.stored(&task.id).unwrap().progress, 100);

    f.scheduler.update_task_progress(&task.id, -5).await.unwrap();
    assert_eq!(
        f.state_store.get_task(&task.id).await.unwrap().unwrap().progress,
        0
    );
}

#[tokio::test]
async fn test_progress_update_for_missing_task_is_noop() {
    let f = fixture(1);
    assert!(f.scheduler.update_task_progress("missing", 50).await.is_ok());
}
