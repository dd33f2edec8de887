use std::time::Duration;

use execution_queue_job::{Job, JobStatus};
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

use super::job_query_helpers::{lease_timeout_secs, stale_lease_clause};

/// Largest page `list_upcoming` returns.
pub const MAX_LIST_LIMIT: i64 = 500;

/// The job a claim for this owner would pick next, without claiming it.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", owner_id = owner_id))]
pub async fn get_next_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    owner_id: &str,
    lane: Option<&str>,
    lease_timeout: Duration,
) -> Result<Option<Job>> {
    let stale_lease = stale_lease_clause("jobs", 3);
    let sql = formatdoc!(
        r#"
            select jobs.*
                from {escaped_schema}.jobs as jobs
                where jobs.owner_id = $1::text
                and (
                    (jobs.status = 'queued' and jobs.run_at <= now())
                    or {stale_lease}
                )
                and jobs.attempts < jobs.max_attempts
                and ($2::text is null or jobs.lane = $2::text)
                order by jobs.priority desc, jobs.run_at asc, jobs.created_at asc, jobs.id asc
                limit 1
        "#
    );

    let job = query_as(&sql)
        .bind(owner_id)
        .bind(lane)
        .bind(lease_timeout_secs(lease_timeout))
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", job_id = job_id))]
pub async fn get_job_by_id<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    owner_id: &str,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs
                where id = $1::bigint and owner_id = $2::text
        "#
    );

    let job = query_as(&sql)
        .bind(job_id)
        .bind(owner_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// Looks a job up without owner scoping, for operator paths.
pub(crate) async fn find_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    job_id: i64,
) -> Result<Option<Job>> {
    let sql = format!("select * from {escaped_schema}.jobs where id = $1::bigint");

    let job = query_as(&sql)
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// Jobs of `owner_id` in `statuses` (all non-terminal ones when empty),
/// soonest first.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", owner_id = owner_id))]
pub async fn list_upcoming<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    owner_id: &str,
    statuses: &[JobStatus],
    limit: i64,
) -> Result<Vec<Job>> {
    let statuses = status_filter(statuses);
    let sql = formatdoc!(
        r#"
            select * from {escaped_schema}.jobs
                where owner_id = $1::text
                and status = any($2::text[])
                order by run_at asc, priority desc, id asc
                limit $3::bigint
        "#
    );

    let jobs = query_as(&sql)
        .bind(owner_id)
        .bind(statuses)
        .bind(clamp_limit(limit))
        .fetch_all(executor)
        .await?;

    Ok(jobs)
}

fn status_filter(statuses: &[JobStatus]) -> Vec<String> {
    let statuses = if statuses.is_empty() {
        &JobStatus::NON_TERMINAL[..]
    } else {
        statuses
    };
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIST_LIMIT)
}
