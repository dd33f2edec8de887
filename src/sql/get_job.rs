use std::time::Duration;

use execution_queue_job::Job;
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

use super::job_query_helpers::{lease_timeout_secs, stale_lease_clause};

/// Atomically claims the best eligible job for `worker_id`.
///
/// Eligible means queued and due, or leased with a heartbeat older than
/// `lease_timeout` (abandoned by its worker). In both cases the job must
/// have attempts left. Rows locked by a concurrent claim are skipped, so two
/// workers never receive the same job.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", worker_id = %worker_id))]
pub async fn get_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_id: &str,
    lane: Option<&str>,
    kinds: Option<&[String]>,
    lease_timeout: Duration,
) -> Result<Option<Job>> {
    let stale_lease = stale_lease_clause("jobs", 2);
    let sql = formatdoc!(
        r#"
            with j as (
                select jobs.id
                    from {escaped_schema}.jobs as jobs
                    where (
                        (jobs.status = 'queued' and jobs.run_at <= now())
                        or {stale_lease}
                    )
                    and jobs.attempts < jobs.max_attempts
                    and ($3::text is null or jobs.lane = $3::text)
                    and ($4::text[] is null or jobs.kind = any($4::text[]))
                    order by jobs.priority desc, jobs.run_at asc, jobs.created_at asc, jobs.id asc
                    limit 1
                    for update
                    skip locked
            )
            update {escaped_schema}.jobs as jobs
                set
                    status = 'claimed',
                    claimed_by = $1::text,
                    lease_token = nextval('{escaped_schema}.jobs_lease_token_seq'),
                    claimed_at = now(),
                    heartbeat_at = now(),
                    attempts = jobs.attempts + 1,
                    next_retry_at = null,
                    updated_at = now()
                from j
                where jobs.id = j.id
                returning jobs.*
        "#
    );

    let job: Option<Job> = query_as(&sql)
        .bind(worker_id)
        .bind(lease_timeout_secs(lease_timeout))
        .bind(lane)
        .bind(kinds)
        .fetch_optional(executor)
        .await?;

    if let Some(job) = &job {
        tracing::info!(
            job_id = job.id(),
            kind = %job.kind(),
            attempts = job.attempts(),
            "Job claimed"
        );
    }

    Ok(job)
}
