use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::Postgres;
use thiserror::Error;

/// Lifecycle state of a job row.
///
/// ```text
/// queued -> claimed -> running -> succeeded
///                              -> queued       (retryable failure, attempts left)
///                              -> dead_letter  (attempts exhausted or permanent failure)
/// queued|claimed|running -> canceled
/// claimed|running -> claimed                    (reclaim after lease expiry)
/// ```
///
/// Stored as text in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    /// Part of the vocabulary for rows written by other producers. Never
    /// written by the worker loop and never claimable; operator retry accepts it.
    Failed,
    DeadLetter,
    Canceled,
}

/// The status string read from the store is not one of the known statuses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown job status '{0}'")]
pub struct UnknownJobStatus(pub String);

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Claimed,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::DeadLetter,
        JobStatus::Canceled,
    ];

    pub const NON_TERMINAL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Claimed,
        JobStatus::Running,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Terminal statuses never transition again through the automatic machine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::DeadLetter | JobStatus::Canceled
        )
    }

    /// A worker holds a lease on the job while it is in one of these statuses.
    pub fn is_leased(&self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Running)
    }

    pub fn is_cancelable(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Claimed | JobStatus::Running
        )
    }

    /// Statuses an operator may reset to `queued` with attempts cleared.
    ///
    /// `dead_letter` is the single terminal status this override may reopen.
    pub fn is_operator_retryable(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Failed | JobStatus::DeadLetter
        )
    }

    /// Whether the automatic machine (claim, finalize, cancel, reclaim) allows
    /// moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Queued, Claimed) => true,
            (Claimed, Running) => true,
            (Claimed | Running, Claimed) => true,
            (Claimed | Running, Succeeded | Queued | DeadLetter) => true,
            (from, Canceled) => from.is_cancelable(),
            _ => false,
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownJobStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownJobStatus(s.to_string()))
    }
}

impl sqlx::Type<Postgres> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <str as sqlx::Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <str as sqlx::Type<Postgres>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for JobStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <&str as sqlx::Encode<'q, Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_status_from_its_text() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert_eq!(
            "done".parse::<JobStatus>(),
            Err(UnknownJobStatus("done".into()))
        );
    }

    #[test]
    fn terminal_statuses_are_final() {
        for from in JobStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{from} should not move to {to}"
                );
            }
        }
    }

    #[test]
    fn canonical_transitions_are_allowed() {
        use JobStatus::*;

        assert!(Queued.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Queued));
        assert!(Running.can_transition_to(DeadLetter));
        assert!(Running.can_transition_to(Claimed));
        assert!(Queued.can_transition_to(Canceled));
        assert!(Running.can_transition_to(Canceled));

        assert!(!Queued.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Succeeded));
        assert!(!Failed.can_transition_to(Canceled));
    }

    #[test]
    fn operator_retry_reopens_dead_letter_only_among_terminals() {
        let reopenable: Vec<_> = JobStatus::ALL
            .iter()
            .filter(|s| s.is_terminal() && s.is_operator_retryable())
            .collect();
        assert_eq!(reopenable, vec![&JobStatus::DeadLetter]);
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(JobStatus::DeadLetter).unwrap(),
            serde_json::json!("dead_letter")
        );
    }
}
