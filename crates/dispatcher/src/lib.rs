pub mod controller;
pub mod recovery_service;
pub mod scheduler;
pub mod state_listener;

pub use controller::SchedulerController;
pub use recovery_service::RecoveryService;
pub use scheduler::{CreateTaskRequest, TaskScheduler};
pub use state_listener::EventListener;
