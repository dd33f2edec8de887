use execution_queue_job::Job;
use getset::Getters;
use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query_as, PgExecutor};
use tracing::{info, warn};

use crate::{
    errors::{ExecutionQueueError, Result},
    JobSpec,
};

use super::job_query_helpers::LIVE_STATUSES_SQL;

/// Bound on insert attempts when the job holding the dedupe key finishes
/// between the conflicting insert and the lookup.
const MAX_DEDUPE_ROUNDS: usize = 3;

/// Outcome of an enqueue.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct EnqueuedJob {
    job: Job,
    /// True when an existing live job with the same dedupe key was returned
    /// instead of inserting a new one
    deduped: bool,
}

impl EnqueuedJob {
    pub fn job_id(&self) -> i64 {
        *self.job.id()
    }

    pub fn into_job(self) -> Job {
        self.job
    }
}

/// Inserts a `queued` job, or returns the live job holding the same
/// `(owner_id, dedupe_key)`.
///
/// Dedupe relies on the partial unique index, never on a read-then-write
/// check, so concurrent producers cannot both insert.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", owner_id = owner_id, kind = kind))]
pub async fn add_job<'e, E>(
    executor: E,
    escaped_schema: &str,
    owner_id: &str,
    kind: &str,
    payload: Value,
    spec: &JobSpec,
) -> Result<EnqueuedJob>
where
    E: PgExecutor<'e> + Copy,
{
    spec.validate(owner_id, kind)?;

    let insert_sql = formatdoc!(
        r#"
            insert into {escaped_schema}.jobs (
                owner_id, kind, payload, priority, lane, run_at, dedupe_key, max_attempts
            )
            values (
                $1::text, $2::text, $3::jsonb, $4::int, $5::text,
                coalesce($6::timestamptz, now()), $7::text, $8::int
            )
            on conflict (owner_id, dedupe_key)
                where dedupe_key is not null and status in {LIVE_STATUSES_SQL}
                do nothing
            returning *
        "#
    );

    let existing_sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs
                where owner_id = $1::text
                and dedupe_key = $2::text
                and status in {LIVE_STATUSES_SQL}
                limit 1
        "#
    );

    for _ in 0..MAX_DEDUPE_ROUNDS {
        let inserted: Option<Job> = query_as(&insert_sql)
            .bind(owner_id)
            .bind(kind)
            .bind(&payload)
            .bind(spec.priority().unwrap_or(0))
            .bind(spec.lane_or_default())
            .bind(spec.run_at())
            .bind(spec.dedupe_key())
            .bind(spec.max_attempts_or_default())
            .fetch_optional(executor)
            .await?;

        if let Some(job) = inserted {
            info!(
                job_id = job.id(),
                owner_id,
                kind,
                lane = %job.lane(),
                priority = job.priority(),
                "Job enqueued"
            );
            return Ok(EnqueuedJob {
                job,
                deduped: false,
            });
        }

        // Nothing was inserted, so a dedupe key was set and collided.
        let Some(dedupe_key) = spec.dedupe_key() else {
            break;
        };

        let existing: Option<Job> = query_as(&existing_sql)
            .bind(owner_id)
            .bind(dedupe_key)
            .fetch_optional(executor)
            .await?;

        if let Some(job) = existing {
            info!(job_id = job.id(), owner_id, kind, %dedupe_key, "Job deduped");
            return Ok(EnqueuedJob { job, deduped: true });
        }

        warn!(owner_id, %dedupe_key, "Deduped job finished before lookup, inserting again");
    }

    Err(ExecutionQueueError::DedupeConflict {
        owner_id: owner_id.to_string(),
        dedupe_key: spec.dedupe_key().clone().unwrap_or_default(),
    })
}
