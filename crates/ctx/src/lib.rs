use std::sync::Arc;

use execution_queue_job::Job;
use getset::Getters;
use sqlx::PgPool;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Everything a handler gets to see about the job it is running.
///
/// Cancellation is cooperative: when the worker learns that its lease is gone
/// (the job was canceled or reclaimed by another worker) it fires
/// `cancel_token`. Long-running handlers should check
/// [`WorkerContext::is_cancel_requested`] between steps, or race their work
/// against [`WorkerContext::cancelled`]. Whatever the handler returns after
/// that point is discarded by the store.
#[derive(Getters, Clone)]
#[getset(get = "pub")]
pub struct WorkerContext {
    /// Pool to the database the queue lives in
    pg_pool: PgPool,
    /// Escaped name of the schema holding the queue tables
    escaped_schema: String,
    /// Job row as it was when claimed
    job: Arc<Job>,
    /// Worker holding the lease
    worker_id: String,
    #[getset(skip)]
    cancel_token: CancellationToken,
}

impl WorkerContext {
    pub fn new(
        pg_pool: PgPool,
        escaped_schema: String,
        job: Arc<Job>,
        worker_id: String,
        cancel_token: CancellationToken,
    ) -> Self {
        WorkerContext {
            pg_pool,
            escaped_schema,
            job,
            worker_id,
            cancel_token,
        }
    }

    /// The raw payload of the job
    pub fn payload(&self) -> &serde_json::Value {
        self.job.payload()
    }

    /// Returns true once the worker has lost its lease on the job.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Resolves once the worker has lost its lease on the job.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }

    /// Token shared with the worker's heartbeat loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("job_id", self.job.id())
            .field("kind", self.job.kind())
            .field("worker_id", &self.worker_id)
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}
