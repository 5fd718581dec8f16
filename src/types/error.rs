//! Error types for EventHub
//!
//! Component errors (`CacheError`, `JobError`) convert into `EventHubError`
//! at the HTTP boundary.

use hyper::StatusCode;

use crate::cache::CacheError;
use crate::jobs::JobError;

/// Main error type for EventHub operations
#[derive(Debug, thiserror::Error)]
pub enum EventHubError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

impl EventHubError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cache(CacheError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Cache(CacheError::FetchFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Cache(CacheError::Rejected(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Job(_) => StatusCode::CONFLICT,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for EventHubError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for EventHubError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for EventHubError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias for EventHub operations
pub type Result<T> = std::result::Result<T, EventHubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EventHubError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EventHubError::Job(JobError::NotFound("job".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EventHubError::from(CacheError::FetchFailed {
                name: "a.png".into(),
                reason: "timeout".into()
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            EventHubError::Job(JobError::AlreadyCompleted("job".into())).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_into_status_code_and_body() {
        let (status, body) = EventHubError::BadRequest("limit".into()).into_status_code_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bad request: limit");
    }
}
