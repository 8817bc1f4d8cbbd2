//! Custom error types for lectern

use std::time::Duration;
use thiserror::Error;

/// Main error type for lectern operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No semantic index available: run 'lectern embed' and 'lectern sync' first")]
    NoSemanticIndex,

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'lectern init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

/// Result type alias for lectern
pub type Result<T> = std::result::Result<T, Error>;

/// How a failed remote call should be treated by a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The provider asked us to slow down, optionally saying for how long
    RateLimited(Option<Duration>),
    /// Timeouts, connection resets, 5xx
    Transient,
    /// Anything else; retrying would not help
    Fatal,
}

impl Error {
    /// Classify this error for retry purposes
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::RateLimited { retry_after, .. } => RetryClass::RateLimited(*retry_after),
            Error::Transient(_) => RetryClass::Transient,
            Error::Http(e) => classify_http(e),
            _ => RetryClass::Fatal,
        }
    }

    /// Build an error from an HTTP status and response body
    pub fn from_status(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let snippet: String = body.chars().take(400).collect();
        let message = format!("HTTP {}: {}", status, snippet);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Error::RateLimited {
                message,
                retry_after,
            }
        } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            Error::Transient(message)
        } else {
            Error::Embedding(message)
        }
    }

    /// Map a FTS5 syntax rejection coming back from SQLite to `InvalidQuery`
    pub(crate) fn into_query_error(self) -> Self {
        match self {
            Error::Database(sqlx::Error::Database(db)) if is_fts_syntax_error(db.message()) => {
                Error::InvalidQuery(db.message().to_string())
            }
            other => other,
        }
    }
}

fn is_fts_syntax_error(message: &str) -> bool {
    message.contains("fts5: syntax error")
        || message.contains("unterminated string")
        || message.contains("no such column")
        || message.contains("unknown special query")
}

fn classify_http(err: &reqwest::Error) -> RetryClass {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return RetryClass::Transient;
    }
    match err.status() {
        Some(s) if s == reqwest::StatusCode::TOO_MANY_REQUESTS => RetryClass::RateLimited(None),
        Some(s) if s.is_server_error() => RetryClass::Transient,
        _ => RetryClass::Fatal,
    }
}

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        use qdrant_client::QdrantError;

        match err {
            QdrantError::ResourceExhaustedError {
                status,
                retry_after_seconds,
            } => Error::RateLimited {
                message: status.message().to_string(),
                // Capped by the retry policy before anyone sleeps on it
                retry_after: Some(Duration::from_secs(retry_after_seconds)),
            },
            QdrantError::ResponseError { status } => {
                // gRPC status codes: 2 unknown, 4 deadline exceeded, 8 resource exhausted,
                // 10 aborted, 13 internal, 14 unavailable
                match status.code() as i32 {
                    8 => Error::RateLimited {
                        message: status.message().to_string(),
                        retry_after: None,
                    },
                    2 | 4 | 10 | 13 | 14 => Error::Transient(format!(
                        "qdrant {:?}: {}",
                        status.code(),
                        status.message()
                    )),
                    _ => Error::Qdrant(format!("{:?}: {}", status.code(), status.message())),
                }
            }
            other => Error::Qdrant(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let err = Error::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down", None);
        assert_eq!(err.retry_class(), RetryClass::RateLimited(None));

        let err = Error::from_status(StatusCode::BAD_GATEWAY, "", None);
        assert_eq!(err.retry_class(), RetryClass::Transient);

        let err = Error::from_status(StatusCode::UNAUTHORIZED, "bad key", None);
        assert_eq!(err.retry_class(), RetryClass::Fatal);

        let err = Error::from_status(StatusCode::BAD_REQUEST, "malformed", None);
        assert_eq!(err.retry_class(), RetryClass::Fatal);
    }

    #[test]
    fn test_retry_after_is_carried() {
        let err = Error::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            "",
            Some(Duration::from_secs(7)),
        );
        assert_eq!(
            err.retry_class(),
            RetryClass::RateLimited(Some(Duration::from_secs(7)))
        );
    }

    #[test]
    fn test_local_errors_are_fatal() {
        assert_eq!(
            Error::InvalidQuery("x".into()).retry_class(),
            RetryClass::Fatal
        );
        assert_eq!(Error::NoSemanticIndex.retry_class(), RetryClass::Fatal);
    }
}
