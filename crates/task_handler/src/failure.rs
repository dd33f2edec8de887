use std::fmt::{Display, Formatter};

use thiserror::Error;

/// What went wrong in a handler, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Network,
    /// An upstream responded with this HTTP status
    Http(u16),
    Unauthorized,
    Validation,
    /// The handler knows retrying cannot help
    Permanent,
    /// The handler knows retrying may help
    Transient,
    /// Nothing is known beyond the message; see [`HandlerError::is_retryable`]
    Unclassified,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Network => write!(f, "network"),
            FailureKind::Http(status) => write!(f, "http_{status}"),
            FailureKind::Unauthorized => write!(f, "unauthorized"),
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::Permanent => write!(f, "permanent"),
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Error returned by a task handler.
///
/// The queue only cares about one bit of it: whether another attempt could
/// succeed. Retryable failures go back to `queued` with a backoff delay,
/// the others go straight to `dead_letter`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{kind}] {message}")]
pub struct HandlerError {
    kind: FailureKind,
    message: String,
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "too many requests",
    "connection reset",
    "connection refused",
    "connection closed",
    "econnreset",
    "econnrefused",
    "network",
    "temporarily",
    "unavailable",
    "try again",
];

const PERMANENT_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "permission denied",
    "invalid",
    "validation",
    "bad request",
    "not found",
    "unprocessable",
];

impl HandlerError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        HandlerError {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Http(status), message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the job should be attempted again (attempts permitting).
    ///
    /// Timeouts, rate limiting, network errors, HTTP 408/429/5xx and
    /// explicitly transient errors are retryable. Auth, validation, other
    /// HTTP statuses and explicitly permanent errors are not. Unclassified
    /// errors are judged from their message and default to retryable.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FailureKind::Timeout
            | FailureKind::RateLimited
            | FailureKind::Network
            | FailureKind::Transient => true,
            FailureKind::Http(status) => is_retryable_http_status(status),
            FailureKind::Unauthorized | FailureKind::Validation | FailureKind::Permanent => false,
            FailureKind::Unclassified => is_retryable_message(&self.message),
        }
    }
}

fn is_retryable_http_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Finds `status 503`, `HTTP 404`, `code: 429`-like mentions in a message.
fn http_status_in(message: &str) -> Option<u16> {
    let lowered = message.to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    words.windows(2).find_map(|pair| {
        let [label, value] = pair else { return None };
        if !matches!(*label, "status" | "http" | "code") {
            return None;
        }
        value
            .parse::<u16>()
            .ok()
            .filter(|status| (100..600).contains(status))
    })
}

fn is_retryable_message(message: &str) -> bool {
    if let Some(status) = http_status_in(message) {
        return status < 400 || is_retryable_http_status(status);
    }

    let lowered = message.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }
    !PERMANENT_MARKERS.iter().any(|m| lowered.contains(m))
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(FailureKind::Unclassified, message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(FailureKind::Unclassified, message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match error.kind() {
            ErrorKind::TimedOut => FailureKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::AddrNotAvailable
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => FailureKind::Network,
            ErrorKind::PermissionDenied => FailureKind::Unauthorized,
            ErrorKind::InvalidInput | ErrorKind::InvalidData => FailureKind::Validation,
            _ => FailureKind::Unclassified,
        };
        HandlerError::new(kind, error.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::validation(error.to_string())
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for HandlerError {
    fn from(error: Box<dyn std::error::Error + Send + Sync>) -> Self {
        HandlerError::new(FailureKind::Unclassified, error.to_string())
    }
}
