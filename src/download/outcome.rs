//! Immutable result of driving one strategy for one task.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use super::error::AttemptError;
use super::retry::FailureType;
use crate::queue::Completion;

/// Reference to something a strategy produced. The engine never opens it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Where the content lives (final URL, storage key, path).
    pub reference: String,
    /// Content size when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Artifact {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            bytes: None,
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Success or classified failure.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success {
        artifacts: Vec<Artifact>,
    },
    Failure {
        error: AttemptError,
        failure_type: FailureType,
    },
}

/// Outcome of a strategy call, after in-place retries.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    outcome: AttemptOutcome,
    duration: Duration,
    attempts: u32,
}

impl AttemptResult {
    #[must_use]
    pub fn success(artifacts: Vec<Artifact>, duration: Duration, attempts: u32) -> Self {
        Self {
            outcome: AttemptOutcome::Success { artifacts },
            duration,
            attempts,
        }
    }

    #[must_use]
    pub fn failure(
        error: AttemptError,
        failure_type: FailureType,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            outcome: AttemptOutcome::Failure {
                error,
                failure_type,
            },
            duration,
            attempts,
        }
    }

    #[must_use]
    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    /// Artifacts of a successful result; empty on failure.
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        match &self.outcome {
            AttemptOutcome::Success { artifacts } => artifacts,
            AttemptOutcome::Failure { .. } => &[],
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&AttemptError> {
        match &self.outcome {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::Failure { error, .. } => Some(error),
        }
    }

    #[must_use]
    pub fn failure_type(&self) -> Option<FailureType> {
        match &self.outcome {
            AttemptOutcome::Success { .. } => None,
            AttemptOutcome::Failure { failure_type, .. } => Some(*failure_type),
        }
    }

    /// True for failures another task-level attempt might fix.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.failure_type().is_some_and(FailureType::is_retryable)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Attempts made inside this result (1 without in-place retries).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// JSON form persisted with the task.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match &self.outcome {
            AttemptOutcome::Success { artifacts } => json!({
                "success": true,
                "artifacts": artifacts,
                "attempts": self.attempts,
                "duration_ms": duration_ms(self.duration),
            }),
            AttemptOutcome::Failure {
                error,
                failure_type,
            } => json!({
                "success": false,
                "error": error.to_string(),
                "failure_type": failure_type.as_str(),
                "attempts": self.attempts,
                "duration_ms": duration_ms(self.duration),
            }),
        }
    }

    /// Queue record for this result, finalizing the task with
    /// `attempt_count` task-level attempts.
    #[must_use]
    pub fn to_completion(&self, attempt_count: u32) -> Completion {
        match &self.outcome {
            AttemptOutcome::Success { .. } => Completion::succeeded(self.to_json(), self.duration),
            AttemptOutcome::Failure { error, .. } => {
                Completion::failed(error.to_string(), attempt_count, self.duration)
                    .with_result(self.to_json())
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
