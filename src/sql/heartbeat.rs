use execution_queue_job::JobLease;
use indoc::formatdoc;
use sqlx::{query, PgExecutor};

use crate::errors::Result;

use super::job_query_helpers::{HELD_LEASE_SQL, LEASED_STATUSES_SQL};

/// Extends `lease`.
///
/// Returns `false` when the lease is gone: the job was canceled, finalized,
/// or reclaimed, possibly by the same worker under a newer lease.
#[tracing::instrument(skip_all, err, level = "trace", fields(otel.kind="client", db.system="postgresql", job_id = lease.job_id()))]
pub async fn heartbeat<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    lease: &JobLease,
) -> Result<bool> {
    let sql = formatdoc!(
        r#"
            update {escaped_schema}.jobs
                set heartbeat_at = now()
                where {HELD_LEASE_SQL}
                and status in {LEASED_STATUSES_SQL}
        "#
    );

    let res = query(&sql)
        .bind(lease.job_id())
        .bind(lease.worker_id())
        .bind(lease.token())
        .execute(executor)
        .await?;

    Ok(res.rows_affected() > 0)
}
