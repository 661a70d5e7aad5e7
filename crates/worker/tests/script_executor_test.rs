use std::sync::Arc;
use std::time::{Duration, Instant};

use render_testing_utils::{InMemoryTaskLogStore, RecordingProgressSink};
use render_worker::ScriptExecutor;

fn sh_args(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

fn executor(dir: &std::path::Path) -> (ScriptExecutor, Arc<InMemoryTaskLogStore>) {
    let log_store = Arc::new(InMemoryTaskLogStore::new());
    (
        ScriptExecutor::new(log_store.clone(), dir.join("logs")),
        log_store,
    )
}

#[tokio::test]
async fn test_successful_command_reports_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let report = executor
        .execute_command(
            "task-ok",
            "sh",
            &sh_args("echo hello; echo world"),
            Duration::from_secs(5),
            progress,
        )
        .await;

    assert!(report.success);
    assert_eq!(report.exit_code, Some(0));
    assert!(!report.timed_out);
    assert!(report.error_message.is_none());

    // 输出逐行写入日志文件
    let content = std::fs::read_to_string(&report.log_file).unwrap();
    assert!(content.contains("[stdout] hello"));
    assert!(content.contains("[stdout] world"));
    assert!(content.contains("退出码"));
}

#[tokio::test]
async fn test_progress_markers_reported_on_strict_increase() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let report = executor
        .execute_command(
            "task-progress",
            "sh",
            &sh_args(
                "echo '正在处理: 2/10'; echo '正在处理: 5/10'; echo '正在处理: 5/10'; echo '正在处理: 10/10'",
            ),
            Duration::from_secs(5),
            progress.clone(),
        )
        .await;

    assert!(report.success);
    // 重复的5/10不触发上报，序列严格递增
    assert_eq!(progress.progress_values("task-progress"), vec![20, 50, 100]);
}

#[tokio::test]
async fn test_nonzero_exit_carries_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let report = executor
        .execute_command(
            "task-fail",
            "sh",
            &sh_args("echo boom >&2; exit 3"),
            Duration::from_secs(5),
            progress,
        )
        .await;

    assert!(!report.success);
    assert_eq!(report.exit_code, Some(3));
    assert!(!report.timed_out);
    assert!(report.error_message.unwrap().contains("boom"));
}

#[tokio::test]
async fn test_nonzero_exit_without_stderr_synthesizes_message() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let report = executor
        .execute_command(
            "task-fail-quiet",
            "sh",
            &sh_args("exit 7"),
            Duration::from_secs(5),
            progress,
        )
        .await;

    assert!(!report.success);
    assert_eq!(report.exit_code, Some(7));
    assert!(report.error_message.unwrap().contains("退出码"));
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let start = Instant::now();
    let report = executor
        .execute_command(
            "task-timeout",
            "sh",
            &sh_args("sleep 30"),
            Duration::from_millis(200),
            progress,
        )
        .await;

    assert!(!report.success);
    assert!(report.timed_out);
    assert!(report.exit_code.is_none());
    assert!(report.error_message.unwrap().contains("超时"));
    // 在超时点附近返回，而不是等进程自己结束
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_spawn_error_is_distinct_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, _logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    let report = executor
        .execute_command(
            "task-spawn",
            "/nonexistent/binary-xyz",
            &[],
            Duration::from_secs(5),
            progress,
        )
        .await;

    assert!(!report.success);
    assert!(report.is_spawn_error());
    assert!(report.error_message.unwrap().contains("启动脚本时出错"));
}

#[tokio::test]
async fn test_output_lines_mirrored_to_log_store() {
    let dir = tempfile::tempdir().unwrap();
    let (executor, logs) = executor(dir.path());
    let progress = Arc::new(RecordingProgressSink::new());

    executor
        .execute_command(
            "task-logs",
            "sh",
            &sh_args("echo first; echo second >&2"),
            Duration::from_secs(5),
            progress,
        )
        .await;

    let entries = logs.entries("task-logs");
    let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("stdout: first")));
    assert!(messages.iter().any(|m| m.contains("stderr: second")));
}
