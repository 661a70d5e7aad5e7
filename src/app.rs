use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use render_api::{create_router, AppState};
use render_core::AppConfig;
use render_dispatcher::{EventListener, RecoveryService, SchedulerController, TaskScheduler};
use render_domain::{MessageQueue, TaskLogStore};
use render_infrastructure::{
    create_pool, run_migrations, FileLogArchiver, MetricsCollector, PostgresTaskRepository,
    RabbitMqMessageQueue, RedisTaskLogStore, RedisTaskStore,
};
use render_worker::{HttpClientCallback, RenderTaskHandler, ScriptExecutor};

use crate::shutdown::ShutdownManager;

/// 应用组装
///
/// 单进程承载调度核心、执行装备和API。多副本部署时各进程独立
/// 运行同样的组装，通过共享的Redis与RabbitMQ收敛状态。
pub struct Application {
    config: AppConfig,
    controller: Arc<SchedulerController>,
    router: axum::Router,
    shutdown: ShutdownManager,
}

impl Application {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let metrics_handle = MetricsCollector::install_prometheus()?;
        let metrics = Arc::new(MetricsCollector::new());

        // 持久化存储
        let pool = create_pool(&config.database).await?;
        run_migrations(&pool).await?;
        let task_repo = Arc::new(PostgresTaskRepository::new(pool));

        // 快路径存储与日志流共用一个Redis连接管理器
        let redis_client = redis::Client::open(config.redis.url.as_str())?;
        let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
        info!("成功连接到Redis: {}", config.redis.url);
        let state_store = Arc::new(RedisTaskStore::new(redis_conn.clone()));
        let log_store: Arc<dyn TaskLogStore> = Arc::new(RedisTaskLogStore::new(redis_conn));

        // 消息总线
        let message_queue: Arc<dyn MessageQueue> =
            Arc::new(RabbitMqMessageQueue::new(config.message_queue.clone()).await?);

        // 调度核心
        let scheduler = Arc::new(TaskScheduler::new(
            state_store.clone(),
            task_repo,
            message_queue.clone(),
            log_store.clone(),
            config.task.clone(),
            config.message_queue.task_queue.clone(),
            metrics,
        ));

        // 执行装备：渲染处理器经由进度接口回写进度
        let archiver = Arc::new(FileLogArchiver::new(log_store.clone(), &config.log.log_dir));
        let callback = Arc::new(HttpClientCallback::new(config.api.callback_client_url.clone()));
        let executor = ScriptExecutor::new(log_store.clone(), &config.log.log_dir);
        let render_handler = RenderTaskHandler::new(
            &config.render,
            &config.task,
            executor,
            scheduler.clone(),
            log_store.clone(),
            archiver,
            callback,
        );
        scheduler.register_handler(Arc::new(render_handler));

        // 生命周期控制
        let listener = Arc::new(EventListener::new(
            scheduler.clone(),
            message_queue,
            config.message_queue.task_queue.clone(),
            config.message_queue.fetch_batch_size,
        ));
        let recovery = RecoveryService::new(state_store, scheduler.clone());
        let controller = Arc::new(SchedulerController::new(
            scheduler.clone(),
            listener,
            recovery,
            Duration::from_millis(config.task.poll_interval_ms),
        ));

        let router = create_router(AppState {
            scheduler,
            log_store,
            log_dir: config.log.log_dir.clone().into(),
            metrics_handle: Some(metrics_handle),
        });

        Ok(Self {
            config,
            controller,
            router,
            shutdown: ShutdownManager::new(),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.controller.start().await?;

        let listener = tokio::net::TcpListener::bind(self.config.api.bind_address.as_str()).await?;
        info!("API服务监听于 {}", self.config.api.bind_address);

        // Ctrl-C触发优雅关闭
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("监听关闭信号失败: {}", e);
                return;
            }
            shutdown.shutdown().await;
        });

        let mut shutdown_rx = self.shutdown.subscribe().await;
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        self.controller.stop().await;
        info!("应用已退出");
        Ok(())
    }
}
