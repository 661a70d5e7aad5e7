pub mod config;
pub mod errors;

pub use config::{
    ApiConfig, AppConfig, DatabaseConfig, LogConfig, MessageQueueConfig, RedisConfig,
    RenderConfig, TaskConfig, TaskTypeConfig,
};
pub use errors::{SchedulerError, SchedulerResult};
