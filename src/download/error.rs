//! Error type for a single retrieval attempt.
//!
//! Strategies report failures as [`AttemptError`] values; the retry policy
//! classifies them (see [`classify_error`](super::classify_error)) and never
//! lets them escape a worker.

use std::time::Duration;

use thiserror::Error;

/// Why one retrieval attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Connection-level failure (DNS, refused, reset).
    #[error("connection error fetching {url}: {message}")]
    Connection { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Parsed `Retry-After` delay, when the server sent one.
        retry_after: Option<Duration>,
    },

    /// The server answered successfully with nothing in the body.
    #[error("empty response from {url}")]
    EmptyResponse { url: String },

    /// The limiter refused the attempt in non-blocking mode.
    #[error("rate limit reached before fetching {url}")]
    RateLimited { url: String },

    /// No registered strategy accepts the task.
    #[error("no strategy can handle {url}")]
    NoStrategy { url: String },

    /// Free-form failure reported by a backend; classified by its message.
    #[error("{message}")]
    Other { message: String },
}

impl AttemptError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a connection error.
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a server-mandated delay.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an empty-response error.
    pub fn empty_response(url: impl Into<String>) -> Self {
        Self::EmptyResponse { url: url.into() }
    }

    /// Creates a free-form error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Server-mandated delay carried by a 429/503 response, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message() {
        let err = AttemptError::http_status("https://example.com/v/1", 503);
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("example.com"));
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_retry_after_only_on_http_status() {
        let err = AttemptError::http_status_with_retry_after(
            "https://example.com",
            429,
            Some(Duration::from_secs(7)),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(AttemptError::timeout("https://example.com").retry_after(), None);
    }

    #[test]
    fn test_other_displays_message_verbatim() {
        let err = AttemptError::other("video has been deleted");
        assert_eq!(err.to_string(), "video has been deleted");
    }
}
