use execution_queue_job::{Job, JobLease};
use indoc::formatdoc;
use serde_json::Value;
use sqlx::{query_as, PgExecutor};

use crate::errors::{ExecutionQueueError, Result};

use super::job_query_helpers::{CLEAR_LEASE_SQL, HELD_LEASE_SQL, LEASED_STATUSES_SQL};

/// Finalizes a job as `succeeded`.
///
/// Nothing is written unless `lease` is still the current one, in which
/// case [`ExecutionQueueError::LeaseLost`] is returned.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = lease.job_id()))]
pub async fn complete_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    lease: &JobLease,
    result: Option<&Value>,
) -> Result<Job> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'succeeded',
                    last_result = $4::jsonb,
                    next_retry_at = null,
                    finished_at = now(),
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
        .bind(result)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| ExecutionQueueError::lease_lost(lease))
}
