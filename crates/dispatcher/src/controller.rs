use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use render_core::SchedulerResult;

use crate::recovery_service::RecoveryService;
use crate::scheduler::TaskScheduler;
use crate::state_listener::EventListener;

/// 调度器生命周期控制
///
/// 启动时先跑一次崩溃恢复，然后拉起两个循环：固定间隔的准入扫描
/// （空闲槽位释放时也会被立即唤醒）和总线事件监听。
pub struct SchedulerController {
    scheduler: Arc<TaskScheduler>,
    listener: Arc<EventListener>,
    recovery: RecoveryService,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl SchedulerController {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        listener: Arc<EventListener>,
        recovery: RecoveryService,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            listener,
            recovery,
            poll_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        self.recovery.run_at_startup().await;

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        self.spawn_admission_loop();
        self.spawn_listener_loop();

        info!("任务调度器已初始化");
        Ok(())
    }

    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            *running = false;
        }
        self.listener.stop().await;
        // 唤醒可能正在等待的准入循环，让它看到停止标记
        self.scheduler.trigger_scan();
        info!("任务调度器已停止");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn spawn_admission_loop(&self) {
        let scheduler = Arc::clone(&self.scheduler);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let signal = scheduler.scan_signal();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = signal.notified() => {}
                }

                if !*running.read().await {
                    break;
                }

                if let Err(e) = scheduler.process_next_tasks().await {
                    error!("处理任务时出错: {}", e);
                }
            }
            info!("准入循环已退出");
        });
    }

    fn spawn_listener_loop(&self) {
        let listener = Arc::clone(&self.listener);
        tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!("事件监听循环出错: {}", e);
            }
        });
    }
}
