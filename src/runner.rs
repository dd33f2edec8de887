use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use execution_queue_ctx::WorkerContext;
use execution_queue_job::{Job, JobLease};
use execution_queue_shutdown_signal::ShutdownSignal;
use execution_queue_task_handler::{
    spawn_task, HandlerError, RunTaskError, SpawnTaskResult, TaskOutcome,
};
use futures::{try_join, StreamExt};
use getset::Getters;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

use crate::builder::WorkerOptions;
use crate::errors::ExecutionQueueError;
use crate::monitor::{fleet_heartbeat, lease_sweeper};
use crate::streams::{job_signal_stream, job_stream, StreamSource};
use crate::worker_utils::{JobOutcome, WorkerUtils};

/// Type-erased handler stored per job kind.
///
/// It takes the `WorkerContext` of a claimed job and returns a future
/// resolving to the outcome of the attempt.
pub type WorkerFn =
    Box<dyn Fn(WorkerContext) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send>> + Send + Sync>;

/// A worker process of the queue.
///
/// It claims jobs of the kinds it has handlers for (within its lane, if it
/// has one), runs up to `concurrency` of them at once and keeps their leases
/// alive with heartbeats. Next to the job loop it records its own liveness
/// in `worker_heartbeats` and sweeps leases abandoned by dead workers.
///
/// Built with [`WorkerOptions::init`].
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Worker {
    pub(crate) worker_id: String,
    pub(crate) concurrency: NonZeroUsize,
    pub(crate) poll_interval: Duration,
    pub(crate) jobs: HashMap<String, WorkerFn>,
    /// Kinds with a registered handler, sorted
    pub(crate) kinds: Vec<String>,
    pub(crate) pg_pool: sqlx::PgPool,
    pub(crate) escaped_schema: String,
    pub(crate) lane: Option<String>,
    pub(crate) lease_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) fleet_heartbeat_interval: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) shutdown_signal: ShutdownSignal,
    #[getset(skip)]
    pub(crate) shutdown_notifier: Arc<Notify>,
    #[getset(skip)]
    pub(crate) utils: WorkerUtils,
}

#[derive(Error, Debug)]
pub enum WorkerRuntimeError {
    #[error("Failed to listen to postgres notifications : '{0}'")]
    PgListen(#[source] ExecutionQueueError),
    #[error("Failed to register worker : '{0}'")]
    Register(#[source] ExecutionQueueError),
}

impl Worker {
    pub fn options() -> WorkerOptions {
        WorkerOptions::default()
    }

    /// Runs until shutdown is requested, either through
    /// [`Worker::request_shutdown`] or a termination signal.
    ///
    /// On shutdown no new job is claimed. Running handlers get the shutdown
    /// timeout to finish; those still running afterwards are aborted and
    /// their jobs recorded as retryable failures.
    pub async fn run(&self) -> Result<(), WorkerRuntimeError> {
        self.utils
            .register_worker(&self.worker_id, self.lane.as_deref())
            .await
            .map_err(WorkerRuntimeError::Register)?;

        info!(
            worker_id = %self.worker_id,
            concurrency = self.concurrency.get(),
            lane = ?self.lane,
            kinds = ?self.kinds,
            "Worker started"
        );

        let heartbeat = async {
            fleet_heartbeat(
                &self.utils,
                &self.worker_id,
                self.lane.as_deref(),
                self.fleet_heartbeat_interval,
                self.shutdown_signal.clone(),
            )
            .await;
            Ok::<_, WorkerRuntimeError>(())
        };
        let sweeper = async {
            lease_sweeper(
                &self.utils,
                self.sweep_interval,
                self.shutdown_signal.clone(),
            )
            .await;
            Ok::<_, WorkerRuntimeError>(())
        };

        try_join!(self.job_runner(), heartbeat, sweeper)?;

        info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }

    /// Processes every job that is eligible right now, then returns.
    ///
    /// Retries scheduled along the way are not waited for.
    pub async fn run_once(&self) -> Result<(), WorkerRuntimeError> {
        let job_stream = job_stream(
            self.pg_pool.clone(),
            self.shutdown_signal.clone(),
            self.escaped_schema.clone(),
            self.worker_id.clone(),
            self.lane.clone(),
            self.kinds.clone(),
            self.lease_timeout,
        );

        job_stream
            .for_each_concurrent(self.concurrency.get(), |job| async move {
                let job_id = *job.id();
                match run_and_release_job(job, self, StreamSource::RunOnce).await {
                    Ok(()) => debug!(job_id, "Job processed"),
                    Err(e) => error!(error = %e, job_id, "Error while processing job"),
                }
            })
            .await;

        Ok(())
    }

    async fn job_runner(&self) -> Result<(), WorkerRuntimeError> {
        let job_signal = job_signal_stream(
            self.pg_pool.clone(),
            self.poll_interval,
            self.shutdown_signal.clone(),
            self.concurrency,
        )
        .await
        .map_err(WorkerRuntimeError::PgListen)?;

        debug!("Listening for jobs...");
        job_signal
            .for_each_concurrent(self.concurrency.get(), |source| async move {
                // store errors only delay the job; the next wake-up tries again
                match process_one_job(self, source).await {
                    Ok(Some(job_id)) => debug!(job_id, "Job processed"),
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "Error while processing job"),
                }
            })
            .await;

        Ok(())
    }

    pub fn create_utils(&self) -> WorkerUtils {
        self.utils.clone()
    }

    /// Asks the worker to stop claiming jobs and wind down.
    pub fn request_shutdown(&self) {
        self.shutdown_notifier.notify_one();
    }
}

#[derive(Error, Debug)]
pub enum ProcessJobError {
    #[error("An error occured while releasing a job : '{0}'")]
    ReleaseJobError(#[from] ReleaseJobError),
    #[error("An error occured while fetching a job to run : '{0}'")]
    GetJobError(#[from] ExecutionQueueError),
}

async fn process_one_job(
    worker: &Worker,
    source: StreamSource,
) -> Result<Option<i64>, ProcessJobError> {
    let job = worker
        .utils
        .claim_kinds(&worker.worker_id, worker.lane.as_deref(), &worker.kinds)
        .await?;

    match job {
        Some(job) => {
            let job_id = *job.id();
            run_and_release_job(job, worker, source).await?;
            Ok(Some(job_id))
        }
        None => {
            trace!(source = ?source, "No job found");
            Ok(None)
        }
    }
}

#[derive(Error, Debug)]
#[error("Failed to release job '{job_id}'. {source}")]
pub struct ReleaseJobError {
    job_id: i64,
    #[source]
    source: ExecutionQueueError,
}

async fn run_and_release_job(
    job: Job,
    worker: &Worker,
    source: StreamSource,
) -> Result<(), ReleaseJobError> {
    let job_id = *job.id();
    let Some(lease) = job.lease() else {
        warn!(job_id, status = %job.status(), "Claimed job carries no lease, skipping");
        return Ok(());
    };
    let job = match worker.utils.mark_running(&lease).await {
        Ok(job) => Arc::new(job),
        Err(ExecutionQueueError::LeaseLost { .. }) => {
            warn!(job_id, "Lease lost before the job started");
            return Ok(());
        }
        Err(e) => return Err(ReleaseJobError { job_id, source: e }),
    };

    let result = run_job(&job, &lease, worker, source).await;
    release_job(result, &job, &lease, worker).await
}

#[tracing::instrument(
    "run_job",
    skip(job, lease, worker, source),
    fields(
        job_id = job.id(),
        kind = %job.kind(),
        attempt = job.attempts(),
        messaging.system = "execution_queue",
        messaging.operation.name = "run_job"
    )
)]
async fn run_job(
    job: &Arc<Job>,
    lease: &JobLease,
    worker: &Worker,
    source: StreamSource,
) -> SpawnTaskResult {
    let Some(task_fn) = worker.jobs.get(job.kind()) else {
        return SpawnTaskResult {
            duration: Duration::ZERO,
            result: Err(RunTaskError::TaskError(HandlerError::permanent(format!(
                "no handler registered for kind `{}`",
                job.kind()
            )))),
        };
    };

    debug!(source = ?source, "Found task");

    let cancel_token = CancellationToken::new();
    let worker_ctx = WorkerContext::new(
        worker.pg_pool.clone(),
        worker.escaped_schema.clone(),
        job.clone(),
        worker.worker_id.clone(),
        cancel_token.clone(),
    );

    let task_fut = task_fn(worker_ctx).instrument(Span::current());
    let abort = abort_after_grace(
        worker.shutdown_signal.clone(),
        cancel_token.clone(),
        worker.shutdown_timeout,
    );

    let task = spawn_task(task_fut, abort);
    tokio::pin!(task);

    tokio::select! {
        res = &mut task => res,
        _ = keep_lease(worker, lease, &cancel_token) => task.await,
    }
}

/// Resolves `grace` after shutdown is requested or the lease is lost.
async fn abort_after_grace(
    shutdown_signal: ShutdownSignal,
    cancel_token: CancellationToken,
    grace: Duration,
) {
    tokio::select! {
        _ = shutdown_signal => {},
        _ = cancel_token.cancelled() => {},
    }
    tokio::time::sleep(grace).await;
}

/// Heartbeats the lease until it is lost, then fires `cancel_token` and
/// returns. Never returns while the lease is held.
async fn keep_lease(worker: &Worker, lease: &JobLease, cancel_token: &CancellationToken) {
    let job_id = *lease.job_id();
    loop {
        tokio::time::sleep(worker.heartbeat_interval).await;
        match worker.utils.heartbeat(lease).await {
            Ok(true) => trace!(job_id, "Lease extended"),
            Ok(false) => {
                warn!(job_id, "Lease lost while running, requesting cancellation");
                cancel_token.cancel();
                return;
            }
            // the sweeper decides when a silent lease is dead
            Err(e) => warn!(error = %e, job_id, "Heartbeat failed"),
        }
    }
}

async fn release_job(
    result: SpawnTaskResult,
    job: &Job,
    lease: &JobLease,
    worker: &Worker,
) -> Result<(), ReleaseJobError> {
    let job_id = *job.id();
    let duration = result.duration;

    let outcome = match result.result {
        Ok(value) => {
            info!(
                job_id,
                kind = %job.kind(),
                duration = duration.as_millis() as u64,
                "Completed task with success"
            );
            JobOutcome::Success(value)
        }
        Err(e) => {
            if e.is_aborted() {
                warn!(job_id, kind = %job.kind(), "Job interrupted after shutdown timeout");
            } else if e.is_panic() {
                error!(job_id, kind = %job.kind(), error = %e, "Handler panicked");
            }
            JobOutcome::from(e)
        }
    };

    match worker.utils.finalize(lease, outcome).await {
        Ok(_) => Ok(()),
        Err(ExecutionQueueError::LeaseLost { .. }) => {
            warn!(job_id, "Lease no longer held, outcome discarded");
            Ok(())
        }
        Err(e) => Err(ReleaseJobError { job_id, source: e }),
    }
}
