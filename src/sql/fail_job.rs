use std::time::Duration;

use execution_queue_job::{Job, JobLease};
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::{ExecutionQueueError, Result};

use super::job_query_helpers::{CLEAR_LEASE_SQL, HELD_LEASE_SQL, LEASED_STATUSES_SQL};

/// Finalizes a failed attempt.
///
/// A retryable failure with attempts left sends the job back to `queued`,
/// eligible again after `retry_delay`. Anything else dead-letters it. The
/// decision and the write happen in one conditional update keyed on the
/// lease, so a job canceled or reclaimed meanwhile is left untouched and
/// [`ExecutionQueueError::LeaseLost`] is returned.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = lease.job_id()))]
pub async fn fail_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    lease: &JobLease,
    message: &str,
    retryable: bool,
    retry_delay: Duration,
) -> Result<Job> {
    let will_retry = "($5::boolean and attempts < max_attempts)";
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = case when {will_retry} then 'queued' else 'dead_letter' end,
                    last_error = $4::text,
                    next_retry_at = case
                        when {will_retry} then now() + $6::float8 * interval '1 second'
                        else null
                    end,
                    run_at = case
                        when {will_retry} then now() + $6::float8 * interval '1 second'
                        else run_at
                    end,
                    finished_at = case when {will_retry} then null else now() end,
                    updated_at = now(),
                    {CLEAR_LEASE_SQL}
                where {HELD_LEASE_SQL}
                and status in {LEASED_STATUSES_SQL}
                returning *
        "#
    );

    query_as(&sql)
        .bind(lease.job_id())
        .bind(lease.worker_id())
        .bind(lease.token())
        .bind(message)
        .bind(retryable)
        .bind(retry_delay.as_secs_f64())
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| ExecutionQueueError::lease_lost(lease))
}
