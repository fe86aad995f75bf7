use serde::Serialize;
use thiserror::Error;

/// Closed taxonomy of catalog failures. Only `Transient` is retried.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed (status {status})")]
    AuthFailure { status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Serializable discriminant of [`FetchError`], used in batch failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    InvalidArgument,
    Transient,
    NotFound,
    AuthFailure,
    Malformed,
    RetriesExhausted,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::InvalidArgument(_) => FetchErrorKind::InvalidArgument,
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::AuthFailure { .. } => FetchErrorKind::AuthFailure,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
            FetchError::RetriesExhausted { .. } => FetchErrorKind::RetriesExhausted,
        }
    }

    /// Maps an HTTP status from the catalog to an error, or `None` on success.
    pub fn from_status(status: u16, body: &str) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(FetchError::AuthFailure { status }),
            404 => Some(FetchError::NotFound(format!("catalog returned 404: {body}"))),
            429 | 500..=599 => Some(FetchError::Transient(format!(
                "catalog returned {status}: {body}"
            ))),
            _ => Some(FetchError::Malformed(format!(
                "catalog returned {status}: {body}"
            ))),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // Connection resets, proxy failures, pool exhaustion and timeouts all
        // surface here before any status is known.
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}
