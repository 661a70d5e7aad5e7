pub mod database;
pub mod log_archiver;
pub mod message_queue;
pub mod metrics;
pub mod redis_log_store;
pub mod redis_store;

pub use database::{create_pool, run_migrations, PostgresTaskRepository};
pub use log_archiver::FileLogArchiver;
pub use message_queue::RabbitMqMessageQueue;
pub use metrics::MetricsCollector;
pub use redis_log_store::RedisTaskLogStore;
pub use redis_store::RedisTaskStore;
