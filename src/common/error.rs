//! Error types for segmentd

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination Store Errors ===
    #[error("Coordination store error: {0}")]
    Coordination(String),

    #[error("Coordination store unreachable: {0}")]
    CoordinationUnavailable(String),

    #[error("Unknown health check: {0}")]
    UnknownCheck(String),

    // === Segment Source Errors ===
    #[error("Segment source error: {0}")]
    SegmentSource(String),

    #[error("Copy failed for {path}: {reason}")]
    CopyFailed { path: String, reason: String },

    // === Placement Errors ===
    #[error("No hosts registered")]
    NoHosts,

    #[error("Insufficient hosts for segment {segment}: need {needed}, have {available}")]
    InsufficientHosts {
        segment: String,
        needed: usize,
        available: usize,
    },

    // === Write Path Errors ===
    #[error("{0}")]
    WriteDenied(#[from] crate::volume::write::Denial),

    #[error("Segment file not on this host: {0}")]
    SegmentNotLocal(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {status}")]
    UnexpectedStatus { url: String, status: u16 },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::CoordinationUnavailable(_)
                | Error::UnexpectedStatus { .. }
                | Error::CopyFailed { .. }
                | Error::NoHosts
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::CoordinationUnavailable(_) | Error::NoHosts => StatusCode::SERVICE_UNAVAILABLE,
            // Write callers only distinguish success from failure.
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::NoHosts.is_retryable());
        assert!(Error::CoordinationUnavailable("down".into()).is_retryable());
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn test_http_status() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::Other("boom".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::NoHosts.to_http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
