use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use render_domain::{LogStage, ProgressSink, TaskLogStore};

/// 一次脚本执行的结果
///
/// 执行器从不向外抛错：启动失败、非零退出、超时都折叠成这个结构，
/// 由上层统一转成终态。
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub error_message: Option<String>,
    pub log_file: PathBuf,
    pub execution_time_ms: u64,
}

impl ExecutionReport {
    /// 进程没能启动（可执行文件缺失、权限不足等）
    pub fn is_spawn_error(&self) -> bool {
        !self.success && self.exit_code.is_none() && !self.timed_out
    }
}

/// 脚本执行器
///
/// 负责拉起外部进程、逐行收集输出到任务日志文件和日志流、
/// 从stdout解析进度并上报、强制超时。
pub struct ScriptExecutor {
    log_store: Arc<dyn TaskLogStore>,
    logs_dir: PathBuf,
}

impl ScriptExecutor {
    pub fn new(log_store: Arc<dyn TaskLogStore>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_store,
            logs_dir: logs_dir.into(),
        }
    }

    pub fn log_file_path(&self, task_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{task_id}.log"))
    }

    /// 执行一条命令，带超时和完整输出采集
    pub async fn execute_command(
        &self,
        task_id: &str,
        program: &str,
        args: &[String],
        timeout: Duration,
        progress: Arc<dyn ProgressSink>,
    ) -> ExecutionReport {
        let log_file_path = self.log_file_path(task_id);
        let start = Instant::now();

        let mut log_file = match self.open_log_file(&log_file_path).await {
            Ok(file) => file,
            Err(message) => {
                error!("{}", message);
                return ExecutionReport {
                    success: false,
                    exit_code: None,
                    timed_out: false,
                    error_message: Some(message),
                    log_file: log_file_path,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        info!("开始执行脚本: {} {:?}, 任务ID: {}", program, args, task_id);
        write_log(&mut log_file, &format!("开始执行脚本: {program}")).await;
        write_log(&mut log_file, &format!("任务ID: {task_id}")).await;
        write_log(&mut log_file, &format!("参数: {}", args.join(" "))).await;
        self.append_stage_log(task_id, &format!("开始执行脚本: {program}, 任务ID: {task_id}"))
            .await;

        // 启动进程；kill_on_drop保证超时路径丢弃子进程句柄时进程被终止
        let mut child = match Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message = format!("启动脚本时出错: {e}");
                error!("{}", message);
                write_log(&mut log_file, &format!("[错误] {message}")).await;
                self.append_stage_log(task_id, &message).await;
                return ExecutionReport {
                    success: false,
                    exit_code: None,
                    timed_out: false,
                    error_message: Some(message),
                    log_file: log_file_path,
                    execution_time_ms: start.elapsed().as_millis() as u64,
                };
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 两个读取任务把输出行汇入同一个通道，false=stdout true=stderr
        let (tx, mut rx) = mpsc::channel::<(bool, String)>(64);
        if let Some(stdout) = stdout {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send((false, line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send((true, line)).await.is_err() {
                        break;
                    }
                }
            });
        }

        let mut stderr_lines: Vec<String> = Vec::new();
        let mut last_progress = 0i32;

        // 排空全部输出后等待进程退出；超时时内层作用域结束，
        // future连同子进程句柄一起被丢弃，进程被杀掉
        let wait_result = {
            let log_file = &mut log_file;
            let stderr_lines = &mut stderr_lines;
            let last_progress = &mut last_progress;
            let drain_and_wait = async move {
                while let Some((is_stderr, line)) = rx.recv().await {
                    let tag = if is_stderr { "stderr" } else { "stdout" };
                    write_log(log_file, &format!("[{tag}] {line}")).await;
                    self.append_stage_log(task_id, &format!("script {tag}: {line}"))
                        .await;

                    if is_stderr {
                        stderr_lines.push(line);
                    } else if let Some(percent) = parse_progress(&line) {
                        if percent > *last_progress {
                            *last_progress = percent;
                            if let Err(e) = progress.update_progress(task_id, percent).await {
                                warn!("更新任务进度失败: {}", e);
                            }
                        }
                    }
                }
                child.wait().await
            };
            tokio::pin!(drain_and_wait);

            tokio::select! {
                result = &mut drain_and_wait => Some(result),
                _ = tokio::time::sleep(timeout) => None,
            }
        };

        let execution_time_ms = start.elapsed().as_millis() as u64;

        let report = match wait_result {
            None => {
                let message = format!("脚本执行超时 ({}秒)", timeout.as_secs());
                warn!("任务[{}]{}", task_id, message);
                write_log(&mut log_file, &format!("[错误] {message}")).await;
                self.append_stage_log(task_id, &message).await;
                ExecutionReport {
                    success: false,
                    exit_code: None,
                    timed_out: true,
                    error_message: Some(message),
                    log_file: log_file_path,
                    execution_time_ms,
                }
            }
            Some(Err(e)) => {
                let message = format!("等待进程结束失败: {e}");
                error!("任务[{}]{}", task_id, message);
                write_log(&mut log_file, &format!("[错误] {message}")).await;
                ExecutionReport {
                    success: false,
                    exit_code: None,
                    timed_out: false,
                    error_message: Some(message),
                    log_file: log_file_path,
                    execution_time_ms,
                }
            }
            Some(Ok(status)) => {
                let exit_code = status.code();
                write_log(
                    &mut log_file,
                    &format!("脚本执行完成，退出码: {exit_code:?}"),
                )
                .await;
                write_log(
                    &mut log_file,
                    &format!("执行时间: {:.2}秒", execution_time_ms as f64 / 1000.0),
                )
                .await;
                self.append_stage_log(task_id, &format!("脚本执行完成，退出码: {exit_code:?}"))
                    .await;

                if status.success() {
                    ExecutionReport {
                        success: true,
                        exit_code,
                        timed_out: false,
                        error_message: None,
                        log_file: log_file_path,
                        execution_time_ms,
                    }
                } else {
                    let message = if stderr_lines.is_empty() {
                        format!("脚本执行失败，退出码: {exit_code:?}")
                    } else {
                        stderr_lines.join("\n")
                    };
                    ExecutionReport {
                        success: false,
                        exit_code,
                        timed_out: false,
                        error_message: Some(message),
                        log_file: log_file_path,
                        execution_time_ms,
                    }
                }
            }
        };

        // 日志文件随句柄关闭，三条路径都恰好关闭一次
        let _ = log_file.flush().await;
        report
    }

    async fn open_log_file(&self, path: &PathBuf) -> Result<File, String> {
        if let Err(e) = tokio::fs::create_dir_all(&self.logs_dir).await {
            return Err(format!("创建日志目录失败: {e}"));
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| format!("打开日志文件失败: {e}"))
    }

    async fn append_stage_log(&self, task_id: &str, message: &str) {
        if let Err(e) = self
            .log_store
            .append(task_id, LogStage::Processing, message)
            .await
        {
            warn!("写入任务日志失败[{}]: {}", task_id, e);
        }
    }
}

async fn write_log(file: &mut File, message: &str) {
    let line = format!(
        "[{}] {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    );
    if let Err(e) = file.write_all(line.as_bytes()).await {
        warn!("写入日志文件失败: {}", e);
    }
}

/// 从stdout行解析 `正在处理: <current>/<total>` 形式的进度标记
pub fn parse_progress(line: &str) -> Option<i32> {
    let rest = line.split("正在处理:").nth(1)?.trim_start();
    let token = rest.split_whitespace().next()?;
    let (current, total) = token.split_once('/')?;
    let current: i64 = current.trim().parse().ok()?;
    let total: i64 = total
        .trim()
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()?;
    if total <= 0 || current < 0 {
        return None;
    }
    Some(((current * 100) / total).clamp(0, 100) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_basic() {
        assert_eq!(parse_progress("正在处理: 5/10"), Some(50));
        assert_eq!(parse_progress("正在处理: 10/10"), Some(100));
        assert_eq!(parse_progress("正在处理: 1/3"), Some(33));
    }

    #[test]
    fn test_parse_progress_embedded_in_line() {
        assert_eq!(parse_progress("Fra:12 正在处理: 12/24 mem"), Some(50));
    }

    #[test]
    fn test_parse_progress_rejects_garbage() {
        assert_eq!(parse_progress("渲染完成"), None);
        assert_eq!(parse_progress("正在处理: x/y"), None);
        assert_eq!(parse_progress("正在处理: 5/0"), None);
        assert_eq!(parse_progress(""), None);
    }

    #[test]
    fn test_parse_progress_clamps_over_total() {
        assert_eq!(parse_progress("正在处理: 15/10"), Some(100));
    }
}
