//! Task types and status definitions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sqlx::FromRow;

use super::error::QueueError;

/// Lowest accepted priority.
pub const MIN_PRIORITY: i64 = -1_000_000;

/// Highest accepted priority.
pub const MAX_PRIORITY: i64 = 1_000_000;

/// Arbitrary per-task metadata, stored as a JSON object.
pub type TaskMetadata = Map<String, Value>;

/// Stable task identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What a task points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Video,
    Image,
    /// Audio track.
    Music,
    /// A user's collection of posts.
    User,
    /// Playlist or collection.
    Mix,
    Live,
}

impl TaskKind {
    pub const ALL: [Self; 6] = [
        Self::Video,
        Self::Image,
        Self::Music,
        Self::User,
        Self::Mix,
        Self::Live,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Music => "music",
            Self::User => "user",
            Self::Mix => "mix",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "video" | "note" => Ok(Self::Video),
            "image" | "gallery" => Ok(Self::Image),
            "music" | "audio" | "track" => Ok(Self::Music),
            "user" => Ok(Self::User),
            "mix" | "playlist" | "collection" => Ok(Self::Mix),
            "live" => Ok(Self::Live),
            _ => Err(format!("invalid task kind: {s}")),
        }
    }
}

/// Lifecycle state of a task.
///
/// `Pending -> Processing -> {Completed | Retrying -> Pending | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Failed an attempt; about to become pending again.
    Retrying,
    /// Finished successfully.
    Completed,
    /// Finished without success.
    Failed,
}

impl TaskStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// True for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "retrying" => Ok(Self::Retrying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// A stored task.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id: TaskId,
    /// Arrival sequence; breaks priority ties.
    pub seq: i64,
    pub url: String,
    /// Kind as stored, parsed via `kind()`.
    #[sqlx(rename = "kind")]
    pub kind_str: String,
    /// Higher priority tasks are delivered first.
    pub priority: i64,
    /// Status as stored, parsed via `status()`.
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Task-level attempts made so far.
    pub attempt_count: i64,
    pub max_attempts: i64,
    /// Metadata object as JSON text.
    #[sqlx(rename = "metadata")]
    pub metadata_json: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
    /// Persisted attempt result as JSON text.
    #[sqlx(rename = "result")]
    pub result_json: Option<String>,
    pub duration_ms: Option<i64>,
}

impl Task {
    /// Returns the parsed kind.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CorruptRow`] if the stored value is unknown.
    pub fn kind(&self) -> Result<TaskKind, QueueError> {
        self.kind_str.parse().map_err(|reason| QueueError::CorruptRow {
            id: self.id.to_string(),
            reason,
        })
    }

    /// Returns the parsed status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CorruptRow`] if the stored value is unknown.
    pub fn status(&self) -> Result<TaskStatus, QueueError> {
        self.status_str.parse().map_err(|reason| QueueError::CorruptRow {
            id: self.id.to_string(),
            reason,
        })
    }

    /// Parses the metadata bag. Invalid JSON yields an empty map.
    #[must_use]
    pub fn metadata(&self) -> TaskMetadata {
        serde_json::from_str(&self.metadata_json).unwrap_or_default()
    }

    /// Parses the persisted result, if any.
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        self.result_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Export form with parsed JSON columns.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "url": self.url,
            "kind": self.kind_str,
            "priority": self.priority,
            "status": self.status_str,
            "attempt_count": self.attempt_count,
            "max_attempts": self.max_attempts,
            "metadata": self.metadata(),
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "completed_at": self.completed_at,
            "last_error": self.last_error,
            "result": self.result(),
            "duration_ms": self.duration_ms,
        })
    }
}

/// A task to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub url: String,
    pub kind: TaskKind,
    pub priority: i64,
    pub max_attempts: u32,
    pub metadata: TaskMetadata,
}

impl NewTask {
    /// New task with priority 0 and three attempts.
    pub fn new(url: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            url: url.into(),
            kind,
            priority: 0,
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            metadata: TaskMetadata::new(),
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks the fields the store cannot check for us.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] describing the first bad field.
    pub fn validate(&self) -> Result<(), QueueError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(QueueError::validation("url must not be empty"));
        }
        let parsed = url::Url::parse(url)
            .map_err(|e| QueueError::validation(format!("url '{url}' is not valid: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(QueueError::validation(format!(
                "url '{url}' must use http or https"
            )));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(QueueError::validation(format!(
                "priority {} outside {MIN_PRIORITY}..={MAX_PRIORITY}",
                self.priority
            )));
        }
        if self.max_attempts == 0 {
            return Err(QueueError::validation("max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Final record written when a task leaves the active set.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    succeeded: bool,
    result: Option<Value>,
    error: Option<String>,
    attempt_count: Option<u32>,
    duration: Duration,
}

impl Completion {
    /// Successful completion; the attempt count is left as stored.
    #[must_use]
    pub fn succeeded(result: Value, duration: Duration) -> Self {
        Self {
            succeeded: true,
            result: Some(result),
            error: None,
            attempt_count: None,
            duration,
        }
    }

    /// Failed completion with the final attempt count.
    pub fn failed(error: impl Into<String>, attempt_count: u32, duration: Duration) -> Self {
        Self {
            succeeded: false,
            result: None,
            error: Some(error.into()),
            attempt_count: Some(attempt_count),
            duration,
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.succeeded
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn attempt_count(&self) -> Option<u32> {
        self.attempt_count
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Status this completion moves a task to.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        if self.succeeded {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        }
    }
}
