use std::time::Duration;

use execution_queue_job::JobStatus;

/// Statuses covered by the dedupe index, as a SQL list.
pub const LIVE_STATUSES_SQL: &str = "('queued', 'claimed', 'running', 'failed')";

/// Statuses in which a worker holds a lease, as a SQL list.
pub const LEASED_STATUSES_SQL: &str = "('claimed', 'running')";

/// Columns reset whenever a lease ends.
pub const CLEAR_LEASE_SQL: &str =
    "claimed_by = null, lease_token = null, claimed_at = null, heartbeat_at = null";

/// Matches the row still held by the lease whose job id, worker id and token
/// are bound at `$1`, `$2` and `$3`.
pub const HELD_LEASE_SQL: &str = "id = $1::bigint and claimed_by = $2::text and lease_token = $3::bigint";

/// SQL list of the statuses accepted by `filter`, e.g. `('queued', 'failed')`.
pub fn status_list_sql(filter: impl Fn(&JobStatus) -> bool) -> String {
    let statuses: Vec<String> = JobStatus::ALL
        .iter()
        .filter(|status| filter(status))
        .map(|status| format!("'{}'", status.as_str()))
        .collect();
    format!("({})", statuses.join(", "))
}

/// Matches leased rows whose heartbeat is older than the lease timeout bound
/// (in seconds) at `$param_ord`.
pub fn stale_lease_clause(table: &str, param_ord: u8) -> String {
    format!(
        "({table}.status in {LEASED_STATUSES_SQL} and {table}.heartbeat_at < now() - ${param_ord}::float8 * interval '1 second')"
    )
}

pub fn lease_timeout_secs(lease_timeout: Duration) -> f64 {
    lease_timeout.as_secs_f64()
}
