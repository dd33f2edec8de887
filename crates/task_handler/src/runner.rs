use std::{future::Future, time::Instant};

use execution_queue_ctx::WorkerContext;
use serde_json::Value;

use crate::{
    failure::HandlerError,
    handler::TaskHandler,
    task_result::{IntoTaskHandlerResult, RunTaskError, SpawnTaskResult, TaskOutcome},
};

/// Deserializes the job payload into `T` and runs it.
///
/// A payload that does not fit `T` can never succeed, so it is reported as a
/// validation error.
pub async fn run_task_from_worker_ctx<T: TaskHandler>(ctx: WorkerContext) -> TaskOutcome {
    let task = match serde_json::from_value::<T>(ctx.payload().clone()) {
        Ok(task) => task,
        Err(e) => {
            return Err(HandlerError::validation(format!(
                "payload does not match `{}`: {e}",
                T::KIND
            )))
        }
    };

    task.run(ctx).await.into_task_handler_result()
}

/// Runs `task` on its own tokio task until it finishes or `abort` resolves.
///
/// A panicking handler is caught and reported as [`RunTaskError::TaskPanic`].
/// When `abort` wins the race the handler task is aborted.
pub async fn spawn_task<F, A>(task: F, abort: A) -> SpawnTaskResult
where
    F: Future<Output = TaskOutcome> + Send + 'static,
    A: Future<Output = ()>,
{
    let start = Instant::now();
    let handle = tokio::spawn(task);
    let abort_handle = handle.abort_handle();

    let result: Result<Option<Value>, RunTaskError> = tokio::select! {
        res = handle => match res {
            Ok(outcome) => outcome.map_err(RunTaskError::TaskError),
            Err(e) if e.is_panic() => Err(RunTaskError::TaskPanic(panic_message(e.into_panic()))),
            Err(_) => Err(RunTaskError::TaskAborted),
        },
        _ = abort => {
            abort_handle.abort();
            Err(RunTaskError::TaskAborted)
        }
    };

    SpawnTaskResult {
        duration: start.elapsed(),
        result,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
