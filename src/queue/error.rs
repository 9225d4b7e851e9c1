//! Error types for task queue operations.

use std::fmt;

use sqlx::error::ErrorKind;
use thiserror::Error;

use super::TaskId;

/// What went wrong inside the store, as far as callers need to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDbErrorKind {
    /// Another connection held the write lock past the busy timeout.
    Busy,
    /// A schema constraint rejected the row (unique, check, not-null).
    Constraint,
    /// No pooled connection became free in time, or the pool is closed.
    Unavailable,
    /// Anything else: IO, driver, decode.
    Other,
}

impl QueueDbErrorKind {
    /// Classifies a sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable,
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => Self::Constraint,
                _ if is_busy_code(db.code().as_deref()) => Self::Busy,
                _ => Self::Other,
            },
            _ => Self::Other,
        }
    }

    /// True when the same call may succeed a moment later.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Busy | Self::Unavailable)
    }
}

// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
fn is_busy_code(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

impl fmt::Display for QueueDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Busy => "busy",
            Self::Constraint => "constraint",
            Self::Unavailable => "unavailable",
            Self::Other => "other",
        })
    }
}

/// Errors that can occur during queue operations.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The submission was rejected before reaching the store.
    #[error("invalid task: {0}")]
    Validation(String),

    #[error("store error ({kind}): {message}")]
    Database {
        kind: QueueDbErrorKind,
        message: String,
    },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// A stored row holds a value this build does not understand.
    #[error("corrupt task row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: QueueDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl QueueError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for store errors worth retrying after a short pause.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { kind, .. } if kind.is_transient())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        let err = QueueError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn test_validation_is_not_transient() {
        assert!(!QueueError::validation("empty url").is_transient());
        assert!(!QueueError::TaskNotFound(TaskId::from("abc")).is_transient());
    }

    #[test]
    fn test_busy_codes_include_extended_variants() {
        assert!(is_busy_code(Some("5")));
        assert!(is_busy_code(Some("517"))); // SQLITE_BUSY_SNAPSHOT
        assert!(is_busy_code(Some("6")));
        assert!(!is_busy_code(Some("19")));
        assert!(!is_busy_code(None));
    }

    #[tokio::test]
    async fn test_check_constraint_is_classified() {
        let db = crate::Database::new_in_memory().await.unwrap();
        let err = sqlx::query("INSERT INTO tasks (id, seq, url, kind) VALUES ('a', 1, 'u', 'podcast')")
            .execute(db.pool())
            .await
            .unwrap_err();
        assert_eq!(QueueDbErrorKind::from_sqlx(&err), QueueDbErrorKind::Constraint);
    }
}
