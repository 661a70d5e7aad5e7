pub mod callback;
pub mod handlers;
pub mod script_executor;
pub mod script_generator;

pub use callback::HttpClientCallback;
pub use handlers::RenderTaskHandler;
pub use script_executor::{ExecutionReport, ScriptExecutor};
pub use script_generator::ScriptGenerator;
