mod failure;
mod handler;
mod runner;
mod task_result;

pub use failure::{FailureKind, HandlerError};
pub use handler::TaskHandler;
pub use runner::{run_task_from_worker_ctx, spawn_task};
pub use task_result::{IntoTaskHandlerResult, RunTaskError, SpawnTaskResult, TaskOutcome};
