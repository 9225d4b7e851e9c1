//! Aggregates derived from the task store.

use serde::Serialize;
use sqlx::FromRow;

/// Per-state counts and derived rates. Never a source of truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks with at least one failed attempt behind them.
    pub retried: u64,
    /// Completed tasks as a percentage of all tasks.
    pub success_rate: f64,
    /// Mean duration of completed tasks, in milliseconds.
    pub average_duration_ms: f64,
    /// Entries in the in-memory delivery heap.
    pub delivery_queue_size: usize,
}

impl QueueStats {
    /// Tasks not yet finished.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing + self.retrying
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct StatsRow {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
    pub retried: i64,
    pub average_duration_ms: Option<f64>,
}

impl StatsRow {
    pub fn into_stats(self, delivery_queue_size: usize) -> QueueStats {
        let count = |v: i64| u64::try_from(v).unwrap_or(0);
        let total = count(self.total);
        let completed = count(self.completed);
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        QueueStats {
            total,
            pending: count(self.pending),
            processing: count(self.processing),
            retrying: count(self.retrying),
            completed,
            failed: count(self.failed),
            retried: count(self.retried),
            success_rate,
            average_duration_ms: self.average_duration_ms.unwrap_or(0.0),
            delivery_queue_size,
        }
    }
}

/// One row of the append-only progress log.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProgressSnapshot {
    pub id: i64,
    pub recorded_at: String,
    pub total_tasks: i64,
    pub pending_tasks: i64,
    /// Processing plus retrying.
    pub active_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}
