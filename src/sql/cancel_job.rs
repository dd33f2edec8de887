use execution_queue_job::{Job, JobStatus};
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};
use tracing::{debug, info};

use crate::errors::{ExecutionQueueError, Result};

use super::{
    inspect::get_job_by_id,
    job_query_helpers::{status_list_sql, CLEAR_LEASE_SQL},
};

/// Rounds of update-then-lookup before giving up on a job whose status
/// keeps changing underneath us.
const MAX_CANCEL_ROUNDS: usize = 3;

/// Cancels a queued or leased job of `owner_id`.
///
/// Canceling a job that already reached a terminal status succeeds without
/// changing it. A running handler is not interrupted here; its worker
/// notices on the next heartbeat.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = job_id))]
pub async fn cancel_job<'e, E>(
    executor: E,
    escaped_schema: &str,
    job_id: i64,
    owner_id: &str,
    reason: Option<&str>,
) -> Result<Job>
where
    E: PgExecutor<'e> + Copy,
{
    let cancelable = status_list_sql(JobStatus::is_cancelable);
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'canceled',
                    cancel_reason = $3::text,
                    next_retry_at = null,
                    finished_at = now(),
                    updated_at = now(),
                    {CLEAR_LEASE_SQL}
                where id = $1::bigint
                and owner_id = $2::text
                and status in {cancelable}
                returning *
        "#
    );

    for _ in 0..MAX_CANCEL_ROUNDS {
        let canceled: Option<Job> = query_as(&sql)
            .bind(job_id)
            .bind(owner_id)
            .bind(reason)
            .fetch_optional(executor)
            .await?;

        if let Some(job) = canceled {
            info!(job_id, owner_id, reason, "Job canceled");
            return Ok(job);
        }

        let job = get_job_by_id(executor, escaped_schema, owner_id, job_id)
            .await?
            .ok_or(ExecutionQueueError::NotFound { job_id })?;

        if job.is_terminal() {
            debug!(job_id, status = %job.status(), "Job already terminal, cancel is a no-op");
            return Ok(job);
        }
        if !job.status().can_transition_to(JobStatus::Canceled) {
            return Err(ExecutionQueueError::InvalidTransition {
                job_id,
                from: *job.status(),
            });
        }
    }

    let job = get_job_by_id(executor, escaped_schema, owner_id, job_id)
        .await?
        .ok_or(ExecutionQueueError::NotFound { job_id })?;
    Err(ExecutionQueueError::InvalidTransition {
        job_id,
        from: *job.status(),
    })
}
