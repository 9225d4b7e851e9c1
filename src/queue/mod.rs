//! Durable, crash-recoverable task queue.
//!
//! `SQLite` holds every task and is the only source of truth; an in-memory
//! heap orders the deliverable (`pending`) set and is rebuilt from the store
//! by [`TaskQueue::recover_on_startup`].
//!
//! # Overview
//!
//! - [`TaskQueue`] - submission, priority dequeue, status transitions
//! - [`Task`] / [`NewTask`] - stored and to-be-submitted tasks
//! - [`TaskStatus`] - `pending -> processing -> completed | retrying -> pending | failed`
//! - [`QueueStats`] / [`ProgressSnapshot`] - derived aggregates
//! - [`QueueError`] - operation error types
//!
//! Every transition is one statement or one transaction and is published as
//! a [`TaskEvent`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mediafetch_core::Database;
//! use mediafetch_core::queue::{Completion, NewTask, TaskKind, TaskQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let queue = TaskQueue::new(db);
//! queue.recover_on_startup().await?;
//!
//! queue.submit(NewTask::new("https://example.com/video/1", TaskKind::Video)).await?;
//!
//! if let Some(task) = queue.dequeue(Duration::from_secs(1)).await? {
//!     // ... fetch it ...
//!     let done = Completion::succeeded(serde_json::json!({"success": true}), Duration::ZERO);
//!     queue.complete(&task.id, &done).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod delivery;
mod error;
mod stats;
mod task;

pub use error::{QueueDbErrorKind, QueueError};
pub use stats::{ProgressSnapshot, QueueStats};
pub use task::{
    Completion, MAX_PRIORITY, MIN_PRIORITY, NewTask, Task, TaskId, TaskKind, TaskMetadata,
    TaskStatus,
};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sqlx::{Sqlite, Transaction};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::events::{EVENT_CHANNEL_CAPACITY, TaskEvent};
use delivery::{DeliveryEntry, DeliveryHeap};
use stats::StatsRow;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Outcome of [`TaskQueue::requeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Back in `pending` with this many attempts recorded.
    Requeued { attempt_count: u32 },
    /// The ceiling was reached; the task is now `failed`.
    Exhausted { attempt_count: u32 },
    /// The task was already terminal; nothing changed.
    AlreadyFinished,
}

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks found `processing` and returned to `pending`.
    pub recovered: Vec<TaskId>,
    /// Deliverable tasks after recovery.
    pub pending: usize,
}

/// Task queue over the durable store.
///
/// Cheap to clone; clones share the store, heap and event channel.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    db: Database,
    heap: Mutex<DeliveryHeap>,
    /// Wakes dequeuers when entries are admitted.
    available: Notify,
    events: broadcast::Sender<TaskEvent>,
}

/// Row used when a transition needs the current state inside a transaction.
#[derive(Debug, sqlx::FromRow)]
struct StateRow {
    status: String,
    attempt_count: i64,
    max_attempts: i64,
    priority: i64,
    seq: i64,
}

impl StateRow {
    fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.status
            .parse()
            .map_err(|reason| QueueError::CorruptRow {
                id: id.to_string(),
                reason,
            })
    }
}

fn count_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl TaskQueue {
    /// Creates a queue over `db`.
    ///
    /// The delivery heap starts empty; call [`recover_on_startup`](Self::recover_on_startup)
    /// once before dequeuing to load tasks left by an earlier process.
    #[must_use]
    pub fn new(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                db,
                heap: Mutex::new(DeliveryHeap::default()),
                available: Notify::new(),
                events,
            }),
        }
    }

    /// Returns the underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Subscribes to transition events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    fn emit(
        &self,
        id: &TaskId,
        old_state: Option<TaskStatus>,
        new_state: TaskStatus,
        error: Option<&str>,
    ) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(TaskEvent::new(
            id.clone(),
            old_state,
            new_state,
            error.map(str::to_string),
        ));
    }

    fn with_heap<T>(&self, f: impl FnOnce(&mut DeliveryHeap) -> T) -> T {
        let mut heap = self
            .inner
            .heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut heap)
    }

    fn admit(&self, entry: DeliveryEntry) {
        self.with_heap(|heap| heap.push(entry));
        self.inner.available.notify_waiters();
    }

    /// Adds a task as `pending` and makes it deliverable.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] for malformed input, or
    /// [`QueueError::Database`] if the insert fails.
    #[instrument(skip(self, task), fields(url = %task.url, kind = %task.kind, priority = task.priority))]
    pub async fn submit(&self, task: NewTask) -> Result<TaskId> {
        task.validate()?;
        let metadata = serde_json::to_string(&task.metadata)
            .map_err(|e| QueueError::validation(format!("metadata is not serializable: {e}")))?;
        let id = TaskId::new();

        let seq: i64 = sqlx::query_scalar(
            r"INSERT INTO tasks (id, seq, url, kind, priority, status, attempt_count, max_attempts, metadata)
              VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM tasks), ?, ?, ?, ?, 0, ?, ?)
              RETURNING seq",
        )
        .bind(&id)
        .bind(task.url.trim())
        .bind(task.kind.as_str())
        .bind(task.priority)
        .bind(TaskStatus::Pending.as_str())
        .bind(i64::from(task.max_attempts))
        .bind(metadata)
        .fetch_one(self.inner.db.pool())
        .await?;

        self.admit(DeliveryEntry {
            priority: task.priority,
            seq,
            id: id.clone(),
        });
        self.emit(&id, None, TaskStatus::Pending, None);
        debug!(task_id = %id, seq, "task submitted");

        Ok(id)
    }

    /// Atomically moves a `pending` task to `processing`.
    ///
    /// `retrying` only exists inside the requeue transaction (and is swept
    /// back to `pending` by startup recovery), so it is never claimable.
    async fn claim(&self, id: &TaskId) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks
              SET status = ?, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND status = ?
              RETURNING *",
        )
        .bind(TaskStatus::Processing.as_str())
        .bind(id)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(self.inner.db.pool())
        .await?;

        Ok(task)
    }

    /// Takes the highest-priority, earliest-submitted pending task and marks
    /// it `processing`.
    ///
    /// Waits up to `timeout` for one to become available; `Ok(None)` means
    /// nothing arrived in time.
    ///
    /// Not cancellation safe: dropping the future mid-claim may leave a task
    /// `processing` until the next startup recovery. Use a short `timeout`
    /// instead of racing it against other futures.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the claim fails; the entry stays
    /// deliverable.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis()))]
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking the heap so an admit in between is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            while let Some(entry) = self.with_heap(DeliveryHeap::pop) {
                match self.claim(&entry.id).await {
                    Ok(Some(task)) => {
                        self.emit(&task.id, Some(TaskStatus::Pending), TaskStatus::Processing, None);
                        debug!(task_id = %task.id, priority = task.priority, "task dequeued");
                        return Ok(Some(task));
                    }
                    Ok(None) => debug!(task_id = %entry.id, "skipping stale delivery entry"),
                    Err(e) => {
                        self.with_heap(|heap| heap.push(entry));
                        return Err(e);
                    }
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Reads the task's state with a no-op write so the transaction holds
    /// the write lock before it reads anything. A deferred transaction that
    /// reads first cannot upgrade once another connection has committed.
    async fn load_state(
        tx: &mut Transaction<'static, Sqlite>,
        id: &TaskId,
    ) -> Result<StateRow> {
        sqlx::query_as::<_, StateRow>(
            r"UPDATE tasks SET updated_at = updated_at WHERE id = ?
              RETURNING status, attempt_count, max_attempts, priority, seq",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| QueueError::TaskNotFound(id.clone()))
    }

    /// Finalizes a task as `completed` or `failed` per `completion`.
    ///
    /// Returns `false` without changing anything if the task is already
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TaskNotFound`] if no task exists with the given ID.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, completion), fields(task_id = %id, success = completion.is_success()))]
    pub async fn complete(&self, id: &TaskId, completion: &Completion) -> Result<bool> {
        let mut tx = self.inner.db.pool().begin().await?;
        let current = Self::load_state(&mut tx, id).await?.status(id)?;
        if current.is_terminal() {
            debug!(status = %current, "task already finished, ignoring completion");
            return Ok(false);
        }

        let new_state = completion.status();
        let result = completion.result().map(ToString::to_string);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let duration_ms = completion.duration().as_millis() as i64;

        sqlx::query(
            r"UPDATE tasks
              SET status = ?,
                  result = ?,
                  last_error = COALESCE(?, last_error),
                  attempt_count = COALESCE(?, attempt_count),
                  duration_ms = ?,
                  completed_at = strftime('%Y-%m-%d %H:%M:%f', 'now'),
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(new_state.as_str())
        .bind(result)
        .bind(completion.error())
        .bind(completion.attempt_count().map(i64::from))
        .bind(duration_ms)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.emit(id, Some(current), new_state, completion.error());
        info!(status = %new_state, "task finished");
        Ok(true)
    }

    /// Finalizes a task as `failed` with its final attempt count.
    ///
    /// # Errors
    ///
    /// See [`complete`](Self::complete).
    pub async fn fail(&self, id: &TaskId, error: &str, attempt_count: u32) -> Result<bool> {
        self.complete(id, &Completion::failed(error, attempt_count, Duration::ZERO))
            .await
    }

    /// Records one failed attempt and makes the task deliverable again.
    ///
    /// # Errors
    ///
    /// See [`requeue_after`](Self::requeue_after).
    pub async fn requeue(&self, id: &TaskId, error: &str) -> Result<RequeueOutcome> {
        self.requeue_after(id, error, 1).await
    }

    /// Records `attempts` failed attempts (at least one) and makes the task
    /// deliverable again.
    ///
    /// The task passes through `retrying` and lands in `pending` in one
    /// transaction, so `retrying` is never visible to a claim. If the new
    /// count reaches the ceiling the task becomes `failed` instead.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TaskNotFound`] if no task exists with the given ID.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self, error), fields(task_id = %id))]
    pub async fn requeue_after(
        &self,
        id: &TaskId,
        error: &str,
        attempts: u32,
    ) -> Result<RequeueOutcome> {
        let mut tx = self.inner.db.pool().begin().await?;
        let state = Self::load_state(&mut tx, id).await?;
        let current = state.status(id)?;
        if current.is_terminal() {
            debug!(status = %current, "task already finished, ignoring requeue");
            return Ok(RequeueOutcome::AlreadyFinished);
        }

        let attempt_count = state
            .attempt_count
            .saturating_add(i64::from(attempts.max(1)))
            .min(state.max_attempts.max(state.attempt_count + 1));
        if attempt_count >= state.max_attempts {
            sqlx::query(
                r"UPDATE tasks
                  SET status = ?, attempt_count = ?, last_error = ?,
                      completed_at = strftime('%Y-%m-%d %H:%M:%f', 'now'),
                      updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                  WHERE id = ?",
            )
            .bind(TaskStatus::Failed.as_str())
            .bind(attempt_count)
            .bind(error)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            self.emit(id, Some(current), TaskStatus::Failed, Some(error));
            warn!(attempt_count, "attempts exhausted, task failed");
            return Ok(RequeueOutcome::Exhausted {
                attempt_count: count_u32(attempt_count),
            });
        }

        sqlx::query(
            r"UPDATE tasks
              SET status = ?, attempt_count = ?, last_error = ?,
                  updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(TaskStatus::Retrying.as_str())
        .bind(attempt_count)
        .bind(error)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(r"UPDATE tasks SET status = ? WHERE id = ?")
            .bind(TaskStatus::Pending.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.emit(id, Some(current), TaskStatus::Retrying, Some(error));
        self.emit(id, Some(TaskStatus::Retrying), TaskStatus::Pending, None);
        self.admit(DeliveryEntry {
            priority: state.priority,
            seq: state.seq,
            id: id.clone(),
        });
        info!(attempt_count, max_attempts = state.max_attempts, "task requeued");

        Ok(RequeueOutcome::Requeued {
            attempt_count: count_u32(attempt_count),
        })
    }

    /// Returns a `processing` task to `pending` without counting an attempt.
    ///
    /// Returns `false` if the task was not `processing`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TaskNotFound`] if no task exists with the given ID.
    /// Returns [`QueueError::Database`] if the update fails.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn release(&self, id: &TaskId) -> Result<bool> {
        let mut tx = self.inner.db.pool().begin().await?;
        let state = Self::load_state(&mut tx, id).await?;
        if state.status(id)? != TaskStatus::Processing {
            return Ok(false);
        }

        sqlx::query(
            r"UPDATE tasks SET status = ?, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.emit(id, Some(TaskStatus::Processing), TaskStatus::Pending, None);
        self.admit(DeliveryEntry {
            priority: state.priority,
            seq: state.seq,
            id: id.clone(),
        });
        info!("task released");
        Ok(true)
    }

    /// Crash recovery: every `processing` task goes back to `pending` with
    /// its attempt count untouched, and the delivery heap is rebuilt from the
    /// store in priority, then arrival, order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the store cannot be read or updated.
    #[instrument(skip(self))]
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport> {
        let mut tx = self.inner.db.pool().begin().await?;

        let recovered: Vec<TaskId> = sqlx::query_scalar(
            r"UPDATE tasks SET status = ?, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE status = ?
              RETURNING id",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::Processing.as_str())
        .fetch_all(&mut *tx)
        .await?;

        // A retrying row only exists if a process died inside requeue.
        sqlx::query(r"UPDATE tasks SET status = ? WHERE status = ?")
            .bind(TaskStatus::Pending.as_str())
            .bind(TaskStatus::Retrying.as_str())
            .execute(&mut *tx)
            .await?;

        let rows: Vec<(TaskId, i64, i64)> = sqlx::query_as(
            r"SELECT id, priority, seq FROM tasks WHERE status = ?
              ORDER BY priority DESC, seq ASC",
        )
        .bind(TaskStatus::Pending.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let pending = rows.len();
        self.with_heap(|heap| {
            heap.replace_all(
                rows.into_iter()
                    .map(|(id, priority, seq)| DeliveryEntry { priority, seq, id }),
            );
        });
        self.inner.available.notify_waiters();

        for id in &recovered {
            self.emit(id, Some(TaskStatus::Processing), TaskStatus::Pending, None);
        }
        if recovered.is_empty() {
            info!(pending, "startup recovery complete");
        } else {
            warn!(
                recovered = recovered.len(),
                pending, "recovered tasks interrupted mid-attempt"
            );
        }

        Ok(RecoveryReport { recovered, pending })
    }

    /// Per-state aggregates from the store.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            r"SELECT
                COUNT(*) AS total,
                COALESCE(SUM(status = 'pending'), 0) AS pending,
                COALESCE(SUM(status = 'processing'), 0) AS processing,
                COALESCE(SUM(status = 'retrying'), 0) AS retrying,
                COALESCE(SUM(status = 'completed'), 0) AS completed,
                COALESCE(SUM(status = 'failed'), 0) AS failed,
                COALESCE(SUM(attempt_count > 0), 0) AS retried,
                AVG(CASE WHEN status = 'completed' THEN duration_ms END) AS average_duration_ms
              FROM tasks",
        )
        .fetch_one(self.inner.db.pool())
        .await?;

        Ok(row.into_stats(self.with_heap(|heap| heap.len())))
    }

    /// Number of tasks not yet finished (pending, retrying or processing).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    pub async fn pending_or_active_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"SELECT COUNT(*) FROM tasks WHERE status IN ('pending', 'retrying', 'processing')",
        )
        .fetch_one(self.inner.db.pool())
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Gets a task by ID.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(r"SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.inner.db.pool())
            .await?;
        Ok(task)
    }

    /// Current status of a task, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails, or
    /// [`QueueError::CorruptRow`] for an unreadable status.
    pub async fn status(&self, id: &TaskId) -> Result<Option<TaskStatus>> {
        let raw: Option<String> = sqlx::query_scalar(r"SELECT status FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.inner.db.pool())
            .await?;
        raw.map(|s| {
            s.parse().map_err(|reason| QueueError::CorruptRow {
                id: id.to_string(),
                reason,
            })
        })
        .transpose()
    }

    /// Tasks in `status`, in delivery order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            r"SELECT * FROM tasks WHERE status = ? ORDER BY priority DESC, seq ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.inner.db.pool())
        .await?;
        Ok(tasks)
    }

    /// All tasks, or those in `status`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn export_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let tasks = match status {
            Some(status) => {
                sqlx::query_as::<_, Task>(r"SELECT * FROM tasks WHERE status = ? ORDER BY seq DESC")
                    .bind(status.as_str())
                    .fetch_all(self.inner.db.pool())
                    .await?
            }
            None => {
                sqlx::query_as::<_, Task>(r"SELECT * FROM tasks ORDER BY seq DESC")
                    .fetch_all(self.inner.db.pool())
                    .await?
            }
        };
        Ok(tasks)
    }

    /// Deletes finished tasks last updated at least `older_than` ago.
    /// Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the delete fails.
    #[instrument(skip(self), fields(older_than_secs = older_than.as_secs()))]
    pub async fn cleanup_finished(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r"DELETE FROM tasks
              WHERE status IN ('completed', 'failed')
                AND updated_at <= strftime('%Y-%m-%d %H:%M:%f', 'now', ?)",
        )
        .bind(format!("-{} seconds", older_than.as_secs()))
        .execute(self.inner.db.pool())
        .await?;

        let removed = result.rows_affected();
        info!(removed, "cleaned up finished tasks");
        Ok(removed)
    }

    /// Appends the current aggregates to the progress log.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn save_snapshot(&self) -> Result<ProgressSnapshot> {
        let stats = self.stats().await?;
        let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);

        let snapshot = sqlx::query_as::<_, ProgressSnapshot>(
            r"INSERT INTO progress_snapshots
                (total_tasks, pending_tasks, active_tasks, completed_tasks, failed_tasks,
                 success_rate, average_duration_ms)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              RETURNING *",
        )
        .bind(as_i64(stats.total))
        .bind(as_i64(stats.pending))
        .bind(as_i64(stats.processing + stats.retrying))
        .bind(as_i64(stats.completed))
        .bind(as_i64(stats.failed))
        .bind(stats.success_rate)
        .bind(stats.average_duration_ms)
        .fetch_one(self.inner.db.pool())
        .await?;

        debug!(snapshot_id = snapshot.id, "progress snapshot saved");
        Ok(snapshot)
    }

    /// Snapshots recorded within the last `since`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the query fails.
    pub async fn recent_snapshots(&self, since: Duration) -> Result<Vec<ProgressSnapshot>> {
        let snapshots = sqlx::query_as::<_, ProgressSnapshot>(
            r"SELECT * FROM progress_snapshots
              WHERE recorded_at >= strftime('%Y-%m-%d %H:%M:%f', 'now', ?)
              ORDER BY id ASC",
        )
        .bind(format!("-{} seconds", since.as_secs()))
        .fetch_all(self.inner.db.pool())
        .await?;
        Ok(snapshots)
    }

    /// Entries currently in the delivery heap (may include stale ones).
    #[must_use]
    pub fn delivery_queue_size(&self) -> usize {
        self.with_heap(|heap| heap.len())
    }
}
