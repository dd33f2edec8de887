use chrono::Utc;
use derive_builder::Builder;
use execution_queue_job::{DEFAULT_LANE, DEFAULT_MAX_ATTEMPTS};
use getset::{Getters, MutGetters, Setters};

use crate::errors::{ExecutionQueueError, Result};

/// Options for a job being enqueued.
///
/// Every field is optional; unset fields fall back to the queue defaults
/// (run now, priority 0, lane `default`, 25 attempts, no dedupe key).
///
/// ```
/// use execution_queue::JobSpec;
/// use chrono::Utc;
///
/// let spec = JobSpec::builder()
///     .lane("realtime")
///     .priority(10)
///     .max_attempts(3)
///     .dedupe_key("sync:inbox")
///     .run_at(Utc::now() + chrono::Duration::minutes(5))
///     .build();
/// ```
#[derive(Getters, Setters, MutGetters, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub", set = "pub", get_mut = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct JobSpec {
    /// The job is not claimable before this instant.
    #[builder(setter(into))]
    pub run_at: Option<chrono::DateTime<Utc>>,

    /// Higher values are claimed first. Defaults to 0.
    pub priority: Option<i32>,

    /// Partition a lane-specific worker claims from.
    #[builder(setter(into))]
    pub lane: Option<String>,

    /// While a job of the same owner with this key is live, enqueueing again
    /// returns that job instead of creating a new one.
    #[builder(setter(into))]
    pub dedupe_key: Option<String>,

    /// Claims allowed before the job is dead-lettered. Defaults to 25.
    pub max_attempts: Option<i32>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    pub fn lane_or_default(&self) -> &str {
        self.lane.as_deref().unwrap_or(DEFAULT_LANE)
    }

    pub fn max_attempts_or_default(&self) -> i32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Checks the spec together with the owner and kind it will be
    /// enqueued with.
    pub fn validate(&self, owner_id: &str, kind: &str) -> Result<()> {
        if owner_id.trim().is_empty() {
            return Err(ExecutionQueueError::Validation("owner_id must not be blank".into()));
        }
        if kind.trim().is_empty() {
            return Err(ExecutionQueueError::Validation("kind must not be blank".into()));
        }
        if self.max_attempts_or_default() < 1 {
            return Err(ExecutionQueueError::Validation(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.lane_or_default().trim().is_empty() {
            return Err(ExecutionQueueError::Validation("lane must not be blank".into()));
        }
        if matches!(&self.dedupe_key, Some(key) if key.trim().is_empty()) {
            return Err(ExecutionQueueError::Validation(
                "dedupe_key must not be blank when set".into(),
            ));
        }
        Ok(())
    }
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}
