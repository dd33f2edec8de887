use getset::Getters;
use serde::{Deserialize, Serialize};

/// Proof of one claim on a job.
///
/// Every claim draws a fresh `token`, so a worker that lost its lease and
/// reclaimed the same job holds a different lease than the execution it
/// abandoned. Heartbeats and finalization are accepted only for the current
/// token.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct JobLease {
    job_id: i64,
    worker_id: String,
    token: i64,
    /// Attempt number this claim started, used to size the retry backoff
    attempt: i32,
}

impl JobLease {
    pub fn new(job_id: i64, worker_id: impl Into<String>, token: i64, attempt: i32) -> Self {
        JobLease {
            job_id,
            worker_id: worker_id.into(),
            token,
            attempt,
        }
    }
}
