mod lease;
mod status;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

pub use lease::JobLease;
pub use status::{JobStatus, UnknownJobStatus};

/// Lane used when the producer does not pick one.
pub const DEFAULT_LANE: &str = "default";

/// Attempts allowed when the producer does not pick a limit.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 25;

/// `Job` is a row of the `jobs` table.
///
/// Rows are never deleted; terminal jobs stay around for inspection.
#[derive(FromRow, Getters, Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct Job {
    #[builder(default)]
    id: i64,
    /// Tenant or user the job belongs to. Every external query is scoped by it.
    #[builder(setter(into))]
    owner_id: String,
    /// Name of the handler that processes this job
    #[builder(setter(into))]
    kind: String,
    /// Handler-defined payload, never inspected by the queue
    #[builder(default = "serde_json::json!({})")]
    payload: Value,
    #[builder(default = "JobStatus::Queued")]
    status: JobStatus,
    /// Higher number means it is claimed sooner
    #[builder(default)]
    priority: i32,
    #[builder(default = "DEFAULT_LANE.to_string()", setter(into))]
    lane: String,
    /// The job is not claimable before this instant
    #[builder(default = "Utc::now()")]
    run_at: DateTime<Utc>,
    /// Set while the job waits out a backoff delay
    #[builder(default, setter(strip_option))]
    next_retry_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option, into))]
    dedupe_key: Option<String>,
    /// How many times the job has been claimed
    #[builder(default)]
    attempts: i32,
    #[builder(default = "DEFAULT_MAX_ATTEMPTS")]
    max_attempts: i32,
    /// Worker currently holding the lease
    #[builder(default, setter(strip_option, into))]
    claimed_by: Option<String>,
    /// Drawn anew by every claim, see [`JobLease`]
    #[builder(default, setter(strip_option))]
    lease_token: Option<i64>,
    #[builder(default, setter(strip_option))]
    claimed_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    heartbeat_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option, into))]
    last_error: Option<String>,
    #[builder(default, setter(strip_option))]
    last_result: Option<Value>,
    #[builder(default = "Utc::now()")]
    created_at: DateTime<Utc>,
    #[builder(default = "Utc::now()")]
    updated_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    finished_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option, into))]
    cancel_reason: Option<String>,
}

impl Job {
    /// Creates a new builder for constructing a `Job`.
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// The lease of the claim that produced this row, if it is leased.
    pub fn lease(&self) -> Option<JobLease> {
        if !self.status.is_leased() {
            return None;
        }
        let worker_id = self.claimed_by.as_ref()?;
        let token = self.lease_token?;
        Some(JobLease::new(self.id, worker_id.clone(), token, self.attempts))
    }
}

impl JobBuilder {
    /// Builds the Job with all configured values.
    ///
    /// # Panics
    /// Panics when `owner_id` or `kind` were not set.
    pub fn build(self) -> Job {
        self.build_internal()
            .expect("owner_id and kind must be set before building a Job")
    }
}
