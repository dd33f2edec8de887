use std::{num::NonZeroUsize, time::Duration};

use execution_queue_job::Job;
use execution_queue_shutdown_signal::ShutdownSignal;
use futures::{stream, Stream};
use rand::Rng;
use sqlx::{postgres::PgListener, PgPool};
use tracing::{error, warn};

use crate::{errors::Result, sql::get_job::get_job};

/// Channel the insert trigger notifies on.
pub const JOBS_INSERT_CHANNEL: &str = "jobs:insert";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Polling,
    PgListener,
    RunOnce,
}

/// A random duration between half of `poll_interval` and all of it, so that
/// idle workers do not poll in lockstep.
pub fn jittered_poll_interval(poll_interval: Duration) -> Duration {
    let max_ms = poll_interval.as_millis() as u64;
    if max_ms < 2 {
        return poll_interval;
    }
    Duration::from_millis(rand::rng().random_range(max_ms / 2..=max_ms))
}

struct JobSignalStreamData {
    poll_interval: Duration,
    pg_listener: PgListener,
    shutdown_signal: ShutdownSignal,
    concurrency: NonZeroUsize,
    yield_n: Option<(NonZeroUsize, StreamSource)>,
}

/// Returns a stream that yields on postgres `NOTIFY 'jobs:insert'` and after
/// each jittered poll delay. Every wake-up is yielded `concurrency` times so
/// that each free slot gets a chance to claim.
pub async fn job_signal_stream(
    pg_pool: PgPool,
    poll_interval: Duration,
    shutdown_signal: ShutdownSignal,
    concurrency: NonZeroUsize,
) -> Result<impl Stream<Item = StreamSource>> {
    let mut pg_listener = PgListener::connect_with(&pg_pool).await?;
    pg_listener.listen(JOBS_INSERT_CHANNEL).await?;

    let stream_data = JobSignalStreamData {
        poll_interval,
        pg_listener,
        shutdown_signal,
        concurrency,
        yield_n: None,
    };

    let stream = stream::unfold(stream_data, |mut f| async {
        if let Some((n, source)) = f.yield_n.take() {
            f.yield_n = NonZeroUsize::new(n.get() - 1).map(|remaining| (remaining, source));
            return Some((source, f));
        }

        let poll_delay = jittered_poll_interval(f.poll_interval);
        let source = tokio::select! {
            _ = tokio::time::sleep(poll_delay) => StreamSource::Polling,
            notification = f.pg_listener.recv() => {
                if let Err(e) = notification {
                    warn!(error = %e, "Job notification listener failed, falling back to polling");
                }
                StreamSource::PgListener
            },
            _ = &mut f.shutdown_signal => return None,
        };

        f.yield_n = NonZeroUsize::new(f.concurrency.get() - 1).map(|n| (n, source));
        Some((source, f))
    });

    Ok(stream)
}

/// Returns a stream of claimed jobs that ends when nothing is eligible any
/// more or when the shutdown signal fires.
pub fn job_stream(
    pg_pool: PgPool,
    shutdown_signal: ShutdownSignal,
    escaped_schema: String,
    worker_id: String,
    lane: Option<String>,
    kinds: Vec<String>,
    lease_timeout: Duration,
) -> impl Stream<Item = Job> {
    stream::unfold((), move |()| {
        let pg_pool = pg_pool.clone();
        let escaped_schema = escaped_schema.clone();
        let worker_id = worker_id.clone();
        let lane = lane.clone();
        let kinds = kinds.clone();

        let job_fut = async move {
            let job = get_job(
                &pg_pool,
                &escaped_schema,
                &worker_id,
                lane.as_deref(),
                Some(kinds.as_slice()),
                lease_timeout,
            )
            .await;

            match job {
                Ok(Some(job)) => Some((job, ())),
                Ok(None) => None,
                Err(e) => {
                    error!(error = %e, "Error occured while trying to get job");
                    None
                }
            }
        };
        let shutdown_fut = shutdown_signal.clone();

        async move {
            tokio::select! {
                res = job_fut => res,
                _ = shutdown_fut => None
            }
        }
    })
}
