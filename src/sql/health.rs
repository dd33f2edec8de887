use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use execution_queue_job::JobStatus;
use getset::Getters;
use indoc::formatdoc;
use serde::Serialize;
use sqlx::{query_as, FromRow, PgExecutor};

use crate::errors::Result;

/// Job counts per status plus fleet liveness.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize)]
#[getset(get = "pub")]
pub struct HealthCounts {
    /// Every status is present, zero when no job has it
    counts: BTreeMap<JobStatus, i64>,
    /// Some worker heartbeat is more recent than the liveness threshold
    worker_alive: bool,
    last_worker_seen_at: Option<DateTime<Utc>>,
}

impl HealthCounts {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }
}

#[derive(FromRow)]
struct StatusCount {
    status: JobStatus,
    count: i64,
}

#[derive(FromRow)]
struct FleetLiveness {
    last_seen_at: Option<DateTime<Utc>>,
    worker_alive: bool,
}

/// Counts jobs per status, for one owner or for everyone.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql"))]
pub async fn health_counts<'e, E>(
    executor: E,
    escaped_schema: &str,
    owner_id: Option<&str>,
    worker_alive_threshold: Duration,
) -> Result<HealthCounts>
where
    E: PgExecutor<'e> + Copy,
{
    let counts_sql = formatdoc!(
        r#"
            select status, count(*)::bigint as count
                from {escaped_schema}.jobs
                where ($1::text is null or owner_id = $1::text)
                group by status
        "#
    );

    let liveness_sql = formatdoc!(
        r#"
            select
                max(last_seen_at) as last_seen_at,
                coalesce(max(last_seen_at) > now() - $1::float8 * interval '1 second', false) as worker_alive
            from {escaped_schema}.worker_heartbeats
        "#
    );

    let rows: Vec<StatusCount> = query_as(&counts_sql)
        .bind(owner_id)
        .fetch_all(executor)
        .await?;

    let liveness: FleetLiveness = query_as(&liveness_sql)
        .bind(worker_alive_threshold.as_secs_f64())
        .fetch_one(executor)
        .await?;

    let mut counts: BTreeMap<JobStatus, i64> =
        JobStatus::ALL.iter().map(|status| (*status, 0)).collect();
    for row in rows {
        counts.insert(row.status, row.count);
    }

    Ok(HealthCounts {
        counts,
        worker_alive: liveness.worker_alive,
        last_worker_seen_at: liveness.last_seen_at,
    })
}
