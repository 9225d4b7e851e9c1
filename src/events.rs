//! Task transition events.
//!
//! Every status change the queue persists is published as a [`TaskEvent`] on
//! a `tokio::sync::broadcast` channel. Subscribers that fall behind lose the
//! oldest events (`RecvError::Lagged`); the store stays authoritative.

use std::time::SystemTime;

use serde::Serialize;

use crate::queue::{TaskId, TaskStatus};

/// Default broadcast buffer per subscriber.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One observed state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// `None` for the submission that created the task.
    pub old_state: Option<TaskStatus>,
    pub new_state: TaskStatus,
    pub timestamp: SystemTime,
    /// Error that caused the transition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    #[must_use]
    pub fn new(
        task_id: TaskId,
        old_state: Option<TaskStatus>,
        new_state: TaskStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            task_id,
            old_state,
            new_state,
            timestamp: SystemTime::now(),
            error,
        }
    }

    /// True when the task reached `Completed` or `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.new_state.is_terminal()
    }
}
