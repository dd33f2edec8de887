use std::time::Duration;

use execution_queue_job::{Job, JobStatus};
use getset::Getters;
use indoc::formatdoc;
use sqlx::{query_as, PgExecutor};

use crate::errors::Result;

use super::job_query_helpers::{
    lease_timeout_secs, stale_lease_clause, CLEAR_LEASE_SQL, LEASED_STATUSES_SQL,
};

/// `last_error` of a job dead-lettered because its lease ran out on the
/// last attempt.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Jobs released by a sweep, split by where they went.
#[derive(Getters, Debug, Default, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ReclaimedJobs {
    requeued: Vec<i64>,
    dead_lettered: Vec<i64>,
}

impl ReclaimedJobs {
    fn from_jobs(jobs: Vec<Job>) -> Self {
        let mut reclaimed = ReclaimedJobs::default();
        for job in jobs {
            match job.status() {
                JobStatus::DeadLetter => reclaimed.dead_lettered.push(*job.id()),
                _ => reclaimed.requeued.push(*job.id()),
            }
        }
        reclaimed
    }

    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requeued.len() + self.dead_lettered.len()
    }
}

/// Releases the leases selected by `predicate` (a condition on `jobs`):
/// jobs with attempts left go back to `queued`, the others are
/// dead-lettered.
fn release_leases_sql(escaped_schema: &str, predicate: &str) -> String {
    let exhausted = "jobs.attempts >= jobs.max_attempts";
    formatdoc!(
        r#"
            with stale as (
                select jobs.id
                    from {escaped_schema}.jobs as jobs
                    where {predicate}
                    for update
                    skip locked
            )
            update {escaped_schema}.jobs as jobs
                set
                    status = case when {exhausted} then 'dead_letter' else 'queued' end,
                    last_error = case when {exhausted} then '{LEASE_EXPIRED_ERROR}' else jobs.last_error end,
                    finished_at = case when {exhausted} then now() else null end,
                    updated_at = now(),
                    {CLEAR_LEASE_SQL}
                from stale
                where jobs.id = stale.id
                returning jobs.*
        "#
    )
}

/// Heartbeat monitor sweep over leases whose heartbeat is older than
/// `lease_timeout`.
///
/// Attempts are left untouched; the next claim counts the new attempt.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn reclaim_abandoned<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    lease_timeout: Duration,
) -> Result<ReclaimedJobs> {
    let sql = release_leases_sql(escaped_schema, &stale_lease_clause("jobs", 1));

    let jobs: Vec<Job> = query_as(&sql)
        .bind(lease_timeout_secs(lease_timeout))
        .fetch_all(executor)
        .await?;

    Ok(ReclaimedJobs::from_jobs(jobs))
}

/// Releases every live lease held by `worker_ids`, whatever the age of the
/// heartbeat. For workers known to be dead.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn release_worker_claims<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    worker_ids: &[&str],
) -> Result<ReclaimedJobs> {
    let predicate = format!(
        "(jobs.status in {LEASED_STATUSES_SQL} and jobs.claimed_by = any($1::text[]))"
    );
    let sql = release_leases_sql(escaped_schema, &predicate);

    let jobs: Vec<Job> = query_as(&sql)
        .bind(worker_ids)
        .fetch_all(executor)
        .await?;

    Ok(ReclaimedJobs::from_jobs(jobs))
}
