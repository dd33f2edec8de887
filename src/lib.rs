//! A durable job execution queue on PostgreSQL.
//!
//! Producers enqueue jobs (a `kind`, a JSON payload and scheduling options)
//! for an owner. Workers claim eligible jobs under a lease, keep the lease
//! alive with heartbeats while the handler runs, and record the outcome:
//! success, a retry after exponential backoff, or the dead letter state once
//! attempts are exhausted or the failure is permanent. Leases of crashed
//! workers are swept back into the queue.
//!
//! ```no_run
//! use execution_queue::{
//!     IntoTaskHandlerResult, JobSpec, TaskHandler, WorkerContext, WorkerOptions,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Serialize)]
//! struct SendDigest {
//!     address: String,
//! }
//!
//! impl TaskHandler for SendDigest {
//!     const KIND: &'static str = "send_digest";
//!
//!     async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult {
//!         println!("sending digest to {}", self.address);
//!         Ok::<(), String>(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = WorkerOptions::default()
//!         .database_url("postgres://localhost/app")
//!         .define_job::<SendDigest>()
//!         .init()
//!         .await?;
//!
//!     worker
//!         .create_utils()
//!         .enqueue(
//!             "user_42",
//!             SendDigest { address: "someone@example.com".into() },
//!             JobSpec::builder().dedupe_key("digest:daily").build(),
//!         )
//!         .await?;
//!
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod errors;
pub mod job_spec;
mod monitor;
pub mod retry_policy;
pub mod runner;
mod sql;
pub mod streams;
mod utils;
pub mod worker_utils;

pub use crate::builder::{WorkerBuildError, WorkerOptions};
pub use crate::errors::{ExecutionQueueError, Result};
pub use crate::job_spec::{JobSpec, JobSpecBuilder};
pub use crate::retry_policy::RetryPolicy;
pub use crate::runner::{Worker, WorkerFn, WorkerRuntimeError};
pub use crate::sql::add_job::EnqueuedJob;
pub use crate::sql::health::HealthCounts;
pub use crate::sql::reclaim::{ReclaimedJobs, LEASE_EXPIRED_ERROR};
pub use crate::worker_utils::{JobOutcome, WorkerUtils};

pub use execution_queue_ctx::WorkerContext;
pub use execution_queue_job::{
    Job, JobLease, JobStatus, UnknownJobStatus, DEFAULT_LANE, DEFAULT_MAX_ATTEMPTS,
};
pub use execution_queue_migrations::MigrateError;
pub use execution_queue_task_handler::{
    FailureKind, HandlerError, IntoTaskHandlerResult, RunTaskError, TaskHandler,
};
