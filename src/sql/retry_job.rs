use execution_queue_job::{Job, JobStatus};
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use tracing::info;

use crate::errors::{ExecutionQueueError, Result};

use super::{
    inspect::find_job,
    job_query_helpers::{status_list_sql, CLEAR_LEASE_SQL},
};

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Rounds of update-then-lookup before giving up on a job whose status
/// keeps changing underneath us.
const MAX_RETRY_ROUNDS: usize = 3;

/// Operator override: puts a queued, failed or dead-lettered job back in the
/// queue with a fresh attempt budget.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = job_id))]
pub async fn retry_job<'e, E>(executor: E, escaped_schema: &str, job_id: i64) -> Result<Job>
where
    E: PgExecutor<'e> + Copy,
{
    let retryable = status_list_sql(JobStatus::is_operator_retryable);
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'queued',
                    attempts = 0,
                    next_retry_at = null,
                    last_error = null,
                    run_at = now(),
                    finished_at = null,
                    updated_at = now(),
                    {CLEAR_LEASE_SQL}
                where id = $1::bigint
                and status in {retryable}
                returning *
        "#
    );

    for _ in 0..MAX_RETRY_ROUNDS {
        let result = query_as::<_, Job>(&sql)
            .bind(job_id)
            .fetch_optional(executor)
            .await;

        match result {
            Ok(Some(job)) => {
                info!(job_id, "Job requeued by operator");
                return Ok(job);
            }
            Ok(None) => {
                let job = find_job(executor, escaped_schema, job_id)
                    .await?
                    .ok_or(ExecutionQueueError::NotFound { job_id })?;
                // status changed between the update and the lookup
                if job.status().is_operator_retryable() {
                    continue;
                }
                return Err(ExecutionQueueError::InvalidTransition {
                    job_id,
                    from: *job.status(),
                });
            }
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                let job = find_job(executor, escaped_schema, job_id)
                    .await?
                    .ok_or(ExecutionQueueError::NotFound { job_id })?;
                return Err(ExecutionQueueError::DedupeConflict {
                    owner_id: job.owner_id().clone(),
                    dedupe_key: job.dedupe_key().clone().unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }

    let job = find_job(executor, escaped_schema, job_id)
        .await?
        .ok_or(ExecutionQueueError::NotFound { job_id })?;
    Err(ExecutionQueueError::InvalidTransition {
        job_id,
        from: *job.status(),
    })
}
