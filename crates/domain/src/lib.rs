pub mod models;
pub mod ports;
pub mod repositories;

pub use models::log::{LogStage, TaskLogEntry};
pub use models::message::{TaskAction, TaskLifecycleEvent, TaskPatch};
pub use models::task::{CallbackParams, Task, TaskFilter, TaskStatus, DEFAULT_PRIORITY};
pub use ports::{
    ClientCallback, EventDelivery, HandlerRegistry, LogArchiver, MessageQueue, ProgressSink,
    TaskHandler, TaskLogStore, TaskOutcome, TaskStateStore,
};
pub use repositories::TaskRepository;
