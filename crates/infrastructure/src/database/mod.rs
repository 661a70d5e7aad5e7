pub mod postgres_task_repository;

pub use postgres_task_repository::PostgresTaskRepository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use render_core::{DatabaseConfig, SchedulerResult};

/// 建立Postgres连接池
pub async fn create_pool(config: &DatabaseConfig) -> SchedulerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    info!("成功连接到数据库");
    Ok(pool)
}

/// 执行内嵌的数据库迁移
pub async fn run_migrations(pool: &PgPool) -> SchedulerResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| render_core::SchedulerError::DatabaseOperation(format!("执行迁移失败: {e}")))?;

    info!("数据库迁移已完成");
    Ok(())
}
