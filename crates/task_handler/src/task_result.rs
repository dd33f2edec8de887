use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::failure::HandlerError;

/// What a handler produced: an optional result document or an error.
pub type TaskOutcome = Result<Option<Value>, HandlerError>;

/// Anything a handler may return.
pub trait IntoTaskHandlerResult {
    fn into_task_handler_result(self) -> TaskOutcome;
}

impl IntoTaskHandlerResult for () {
    fn into_task_handler_result(self) -> TaskOutcome {
        Ok(None)
    }
}

impl<T, E> IntoTaskHandlerResult for Result<T, E>
where
    T: Serialize,
    E: Into<HandlerError>,
{
    fn into_task_handler_result(self) -> TaskOutcome {
        let value = self.map_err(Into::into)?;
        match serde_json::to_value(value) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(e) => Err(HandlerError::permanent(format!(
                "could not serialize handler result: {e}"
            ))),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTaskError {
    #[error("handler panicked: {0}")]
    TaskPanic(String),
    #[error("handler was aborted")]
    TaskAborted,
    #[error("{0}")]
    TaskError(#[from] HandlerError),
}

impl RunTaskError {
    pub fn is_panic(&self) -> bool {
        matches!(self, RunTaskError::TaskPanic(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunTaskError::TaskAborted)
    }

    /// Panics and aborts say nothing about the job itself, so they are
    /// always worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RunTaskError::TaskPanic(_) | RunTaskError::TaskAborted => true,
            RunTaskError::TaskError(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnTaskResult {
    pub duration: Duration,
    pub result: Result<Option<Value>, RunTaskError>,
}

impl SpawnTaskResult {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn result(&self) -> &Result<Option<Value>, RunTaskError> {
        &self.result
    }
}
