use std::time::Duration;

use execution_queue_job::{Job, JobLease, JobStatus};
use execution_queue_migrations::migrate;
use execution_queue_task_handler::{HandlerError, RunTaskError, TaskHandler};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::retry_policy::RetryPolicy;
use crate::sql::{
    add_job::{add_job, EnqueuedJob},
    cancel_job::cancel_job,
    complete_job::complete_job,
    fail_job::fail_job,
    get_job::get_job,
    health::{health_counts, HealthCounts},
    heartbeat::heartbeat,
    inspect::{get_job_by_id, get_next_job, list_upcoming},
    mark_running::mark_running,
    reclaim::{reclaim_abandoned, release_worker_claims, ReclaimedJobs},
    retry_job::retry_job,
    worker_heartbeat::{register_worker, touch_worker},
};
use crate::JobSpec;

/// Default age after which a lease without heartbeat is considered abandoned.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age of the newest worker heartbeat for the fleet to count as alive.
pub const DEFAULT_WORKER_ALIVE_THRESHOLD: Duration = Duration::from_secs(60);

/// How an attempt ended, as reported to [`WorkerUtils::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(Option<Value>),
    Failure { error: String, retryable: bool },
}

impl From<HandlerError> for JobOutcome {
    fn from(error: HandlerError) -> Self {
        JobOutcome::Failure {
            retryable: error.is_retryable(),
            error: error.to_string(),
        }
    }
}

impl From<RunTaskError> for JobOutcome {
    fn from(error: RunTaskError) -> Self {
        JobOutcome::Failure {
            retryable: error.is_retryable(),
            error: error.to_string(),
        }
    }
}

/// The queue's external-facing operations.
///
/// Producers enqueue, cancel and inspect jobs through it; workers claim,
/// heartbeat and finalize through it. Every operation is a single
/// conditional statement against the store, so callers on different
/// processes can use it concurrently.
#[derive(Clone)]
pub struct WorkerUtils {
    pg_pool: PgPool,
    escaped_schema: String,
    lease_timeout: Duration,
    worker_alive_threshold: Duration,
    retry_policy: RetryPolicy,
}

impl WorkerUtils {
    pub fn new(pg_pool: PgPool, escaped_schema: String) -> Self {
        Self {
            pg_pool,
            escaped_schema,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            worker_alive_threshold: DEFAULT_WORKER_ALIVE_THRESHOLD,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    pub fn with_worker_alive_threshold(mut self, threshold: Duration) -> Self {
        self.worker_alive_threshold = threshold;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn pg_pool(&self) -> &PgPool {
        &self.pg_pool
    }

    pub fn escaped_schema(&self) -> &str {
        &self.escaped_schema
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Enqueues a typed job for `owner_id`, its kind taken from the handler.
    ///
    /// ```
    /// # use execution_queue::{WorkerUtils, JobSpec, TaskHandler, WorkerContext, IntoTaskHandlerResult};
    /// # use execution_queue::errors::ExecutionQueueError;
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Deserialize, Serialize)]
    /// # struct SyncMailbox { mailbox: String }
    /// # impl TaskHandler for SyncMailbox {
    /// #     const KIND: &'static str = "email_sync";
    /// #     async fn run(self, _ctx: WorkerContext) -> impl IntoTaskHandlerResult { Ok::<(), String>(()) }
    /// # }
    /// # async fn example(utils: &WorkerUtils) -> Result<(), ExecutionQueueError> {
    /// let enqueued = utils
    ///     .enqueue(
    ///         "user_1",
    ///         SyncMailbox { mailbox: "inbox".into() },
    ///         JobSpec::builder().dedupe_key("sync:inbox").priority(10).build(),
    ///     )
    ///     .await?;
    /// if *enqueued.deduped() {
    ///     println!("already queued as job {}", enqueued.job_id());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue<T: TaskHandler>(
        &self,
        owner_id: &str,
        payload: T,
        spec: JobSpec,
    ) -> Result<EnqueuedJob> {
        let payload = serde_json::to_value(payload)?;
        add_job(
            &self.pg_pool,
            &self.escaped_schema,
            owner_id,
            T::KIND,
            payload,
            &spec,
        )
        .await
    }

    /// Enqueues a job by kind name, for producers without the handler type.
    pub async fn enqueue_raw<P: Serialize>(
        &self,
        owner_id: &str,
        kind: &str,
        payload: P,
        spec: JobSpec,
    ) -> Result<EnqueuedJob> {
        let payload = serde_json::to_value(payload)?;
        add_job(
            &self.pg_pool,
            &self.escaped_schema,
            owner_id,
            kind,
            payload,
            &spec,
        )
        .await
    }

    /// Claims the best eligible job of any kind.
    pub async fn claim(&self, worker_id: &str, lane: Option<&str>) -> Result<Option<Job>> {
        get_job(
            &self.pg_pool,
            &self.escaped_schema,
            worker_id,
            lane,
            None,
            self.lease_timeout,
        )
        .await
    }

    /// Claims the best eligible job among `kinds`.
    pub async fn claim_kinds(
        &self,
        worker_id: &str,
        lane: Option<&str>,
        kinds: &[String],
    ) -> Result<Option<Job>> {
        get_job(
            &self.pg_pool,
            &self.escaped_schema,
            worker_id,
            lane,
            Some(kinds),
            self.lease_timeout,
        )
        .await
    }

    pub async fn mark_running(&self, lease: &JobLease) -> Result<Job> {
        mark_running(&self.pg_pool, &self.escaped_schema, lease).await
    }

    /// Extends the lease; `Ok(false)` means it is gone.
    pub async fn heartbeat(&self, lease: &JobLease) -> Result<bool> {
        heartbeat(&self.pg_pool, &self.escaped_schema, lease).await
    }

    /// Records the outcome of the attempt made under `lease`.
    ///
    /// The retry backoff is sized from the attempt the lease was claimed
    /// for, which is the stored attempt count for as long as the lease is
    /// current. Fails with `LeaseLost` otherwise.
    pub async fn finalize(&self, lease: &JobLease, outcome: JobOutcome) -> Result<Job> {
        let job_id = *lease.job_id();
        match outcome {
            JobOutcome::Success(result) => {
                let job =
                    complete_job(&self.pg_pool, &self.escaped_schema, lease, result.as_ref())
                        .await?;
                info!(job_id, kind = %job.kind(), attempts = job.attempts(), "Job succeeded");
                Ok(job)
            }
            JobOutcome::Failure { error, retryable } => {
                let delay = self.retry_policy.delay_for(*lease.attempt());
                let job = fail_job(
                    &self.pg_pool,
                    &self.escaped_schema,
                    lease,
                    &error,
                    retryable,
                    delay,
                )
                .await?;

                if job.status() == &JobStatus::DeadLetter {
                    error!(
                        job_id,
                        kind = %job.kind(),
                        attempts = job.attempts(),
                        max_attempts = job.max_attempts(),
                        exhausted = job.attempts_exhausted(),
                        retryable,
                        %error,
                        "Job dead-lettered"
                    );
                } else {
                    warn!(
                        job_id,
                        kind = %job.kind(),
                        attempts = job.attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        %error,
                        "Job failed, retry scheduled"
                    );
                }
                Ok(job)
            }
        }
    }

    /// Cancels a queued or leased job. Already terminal jobs are returned
    /// unchanged.
    pub async fn cancel(&self, job_id: i64, owner_id: &str, reason: Option<&str>) -> Result<Job> {
        cancel_job(&self.pg_pool, &self.escaped_schema, job_id, owner_id, reason).await
    }

    /// Operator override resetting attempts on a queued, failed or
    /// dead-lettered job.
    pub async fn retry(&self, job_id: i64) -> Result<Job> {
        retry_job(&self.pg_pool, &self.escaped_schema, job_id).await
    }

    pub async fn get_next(&self, owner_id: &str, lane: Option<&str>) -> Result<Option<Job>> {
        get_next_job(
            &self.pg_pool,
            &self.escaped_schema,
            owner_id,
            lane,
            self.lease_timeout,
        )
        .await
    }

    pub async fn get_job(&self, owner_id: &str, job_id: i64) -> Result<Option<Job>> {
        get_job_by_id(&self.pg_pool, &self.escaped_schema, owner_id, job_id).await
    }

    pub async fn list_upcoming(
        &self,
        owner_id: &str,
        statuses: &[JobStatus],
        limit: i64,
    ) -> Result<Vec<Job>> {
        list_upcoming(&self.pg_pool, &self.escaped_schema, owner_id, statuses, limit).await
    }

    pub async fn health_counts(&self, owner_id: Option<&str>) -> Result<HealthCounts> {
        health_counts(
            &self.pg_pool,
            &self.escaped_schema,
            owner_id,
            self.worker_alive_threshold,
        )
        .await
    }

    /// Releases leases whose heartbeat is older than the lease timeout.
    pub async fn reclaim_abandoned(&self) -> Result<ReclaimedJobs> {
        let reclaimed =
            reclaim_abandoned(&self.pg_pool, &self.escaped_schema, self.lease_timeout).await?;
        if !reclaimed.is_empty() {
            info!(
                requeued = reclaimed.requeued().len(),
                dead_lettered = reclaimed.dead_lettered().len(),
                "Reclaimed abandoned jobs"
            );
        }
        Ok(reclaimed)
    }

    /// Releases every lease held by the given workers.
    ///
    /// Useful after a crash, when the workers are known to be gone and
    /// waiting for the lease timeout is not wanted.
    pub async fn release_worker_claims(&self, worker_ids: &[&str]) -> Result<ReclaimedJobs> {
        let released =
            release_worker_claims(&self.pg_pool, &self.escaped_schema, worker_ids).await?;
        info!(
            workers = worker_ids.len(),
            requeued = released.requeued().len(),
            dead_lettered = released.dead_lettered().len(),
            "Released worker claims"
        );
        Ok(released)
    }

    pub async fn register_worker(&self, worker_id: &str, lane: Option<&str>) -> Result<()> {
        register_worker(&self.pg_pool, &self.escaped_schema, worker_id, lane).await
    }

    pub async fn touch_worker(&self, worker_id: &str, lane: Option<&str>) -> Result<()> {
        touch_worker(&self.pg_pool, &self.escaped_schema, worker_id, lane).await
    }

    /// Brings the schema up to date. Worker initialization does this too.
    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.pg_pool, &self.escaped_schema).await?;
        Ok(())
    }
}
