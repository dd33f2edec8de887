use execution_queue_job::{JobLease, JobStatus};
use execution_queue_migrations::MigrateError;
use thiserror::Error;

/// Errors returned by queue operations.
///
/// Handler failures are not queue errors; they travel as
/// [`HandlerError`](crate::HandlerError) values and end up in `last_error`.
#[derive(Error, Debug)]
pub enum ExecutionQueueError {
    /// Input was rejected before anything was written
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No job with this id exists for the given owner
    #[error("Job {job_id} not found")]
    NotFound { job_id: i64 },

    /// The requested transition is not allowed from the job's current status
    #[error("Job {job_id} cannot be changed while it is {from}")]
    InvalidTransition { job_id: i64, from: JobStatus },

    /// Another live job already holds this dedupe key
    #[error("Dedupe key '{dedupe_key}' is already held by a live job of owner '{owner_id}'")]
    DedupeConflict {
        owner_id: String,
        dedupe_key: String,
    },

    /// The lease is no longer the current one; nothing was written
    #[error("Worker '{worker_id}' no longer holds lease {lease_token} on job {job_id}")]
    LeaseLost {
        job_id: i64,
        worker_id: String,
        lease_token: i64,
    },

    #[error("Error occured while query: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Error while serializing params: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error occured while migrating: {0}")]
    Migration(#[from] MigrateError),
}

impl ExecutionQueueError {
    pub(crate) fn lease_lost(lease: &JobLease) -> Self {
        ExecutionQueueError::LeaseLost {
            job_id: *lease.job_id(),
            worker_id: lease.worker_id().clone(),
            lease_token: *lease.token(),
        }
    }

    /// True for errors caused by the caller's input, the ones an HTTP layer
    /// would answer with a 4xx.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExecutionQueueError::Validation(_)
                | ExecutionQueueError::NotFound { .. }
                | ExecutionQueueError::InvalidTransition { .. }
                | ExecutionQueueError::DedupeConflict { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, ExecutionQueueError>;
