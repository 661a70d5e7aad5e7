mod app;
mod shutdown;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use render_core::AppConfig;

#[derive(Parser)]
#[command(name = "render-scheduler", version, about = "分布式渲染任务调度系统")]
struct Cli {
    /// 配置文件路径(TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// 日志过滤器，如 info,render_dispatcher=debug
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG优先于命令行默认值
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load(cli.config.as_deref())?;
    info!(
        "配置加载完成: 并发上限={}, 事件队列={}",
        config.task.max_concurrent_tasks, config.message_queue.task_queue
    );

    let application = app::Application::build(config).await?;
    application.run().await
}
