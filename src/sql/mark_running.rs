use execution_queue_job::{Job, JobLease};
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::{ExecutionQueueError, Result};

use super::job_query_helpers::HELD_LEASE_SQL;

/// `claimed -> running`, only under the current lease.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = lease.job_id()))]
pub async fn mark_running<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    lease: &JobLease,
) -> Result<Job> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set
                    status = 'running',
                    started_at = now(),
                    heartbeat_at = now(),
                    updated_at = now()
                where {HELD_LEASE_SQL}
                and status = 'claimed'
                returning *
        "#
    );

    query_as(&sql)
        .bind(lease.job_id())
        .bind(lease.worker_id())
        .bind(lease.token())
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| ExecutionQueueError::lease_lost(lease))
}
