//! Worker pool driving tasks from the queue through the strategy chain.
//!
//! # Overview
//!
//! The [`Orchestrator`] owns a [`TaskQueue`], an [`AdaptiveRateLimiter`], a
//! [`RetryPolicy`] and a [`StrategyChain`]. [`Orchestrator::start`] recovers
//! the queue and spawns `max_concurrency` workers. Each worker:
//!
//! 1. Dequeues the next task (short timeout, so shutdown is noticed)
//! 2. Runs every strategy that can handle it, in priority order, each wrapped
//!    by the retry policy; every attempt first acquires the rate limiter and
//!    reports failures back to it
//! 3. Completes the task on the first success, requeues it if some failure
//!    was retryable, or fails it
//!
//! Every download call counts against the task's `max_attempts`. In-place
//! retries and fallback strategies draw from what is left of it, so a task
//! never sees more calls than its ceiling.
//!
//! A worker never dies from one task: queue errors are logged and the loop
//! continues.
//!
//! # Shutdown
//!
//! [`Orchestrator::stop`] lets in-flight tasks finish. [`Orchestrator::stop_within`]
//! aborts whatever is still running after a grace period and releases those
//! tasks back to `pending` without an attempt penalty.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mediafetch_core::{Database, EngineConfig, HttpStrategy, Orchestrator, TaskQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let queue = TaskQueue::new(Database::new_in_memory().await?);
//! let orchestrator = Orchestrator::from_config(queue, &config);
//! orchestrator.register_strategy(Arc::new(HttpStrategy::new()?));
//!
//! orchestrator.submit("https://example.com/video/1", None, 0).await?;
//! orchestrator.start(config.orchestrator.max_concurrency).await?;
//! orchestrator.wait_until_idle(Some(Duration::from_secs(60))).await?;
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::AttemptError;
use super::outcome::AttemptResult;
use super::rate_limiter::{AdaptiveRateLimiter, RateLimiterStats};
use super::retry::{FailureType, RetryPolicy, RetryStats};
use super::strategy::{Strategy, StrategyChain};
use crate::config::{EngineConfig, MAX_CONCURRENCY, MIN_CONCURRENCY, OrchestratorSection};
use crate::credentials::{CredentialProvider, Credentials};
use crate::events::TaskEvent;
use crate::queue::{
    MAX_PRIORITY, NewTask, QueueError, QueueStats, RecoveryReport, RequeueOutcome, Task, TaskId,
    TaskKind, TaskQueue, TaskStatus,
};
use crate::resolver::{ResolveError, UrlResolver, classify_url};

/// How often `wait_until_idle` re-checks the store.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a queue error before the worker dequeues again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Error type for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// `start` was called while workers are running.
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// Submission after `stop`.
    #[error("orchestrator is stopped and not accepting tasks")]
    NotAccepting,

    /// URL resolution failed.
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Snapshot of queue, limiter and retry statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub queue: QueueStats,
    pub rate_limiter: RateLimiterStats,
    pub retry: RetryStats,
    /// Workers currently processing a task.
    pub active_workers: usize,
    /// Workers spawned by the last `start`, 0 when stopped.
    pub workers: usize,
    pub strategies: Vec<String>,
}

struct Shared {
    queue: TaskQueue,
    limiter: AdaptiveRateLimiter,
    retry: RetryPolicy,
    strategies: RwLock<StrategyChain>,
    resolver: Option<Arc<dyn UrlResolver>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    settings: OrchestratorSection,
    active: AtomicUsize,
}

struct Running {
    workers: Vec<JoinHandle<()>>,
    checkpoint: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

/// Concurrency-bounded task runner. See the [module docs](self).
pub struct Orchestrator {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    worker_count: AtomicUsize,
    accepting: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.worker_count.load(Ordering::SeqCst))
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator from explicit components.
    #[must_use]
    pub fn new(
        queue: TaskQueue,
        limiter: AdaptiveRateLimiter,
        retry: RetryPolicy,
        settings: OrchestratorSection,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                limiter,
                retry,
                strategies: RwLock::new(StrategyChain::new()),
                resolver: None,
                credentials: None,
                settings,
                active: AtomicUsize::new(0),
            }),
            running: Mutex::new(None),
            worker_count: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
        }
    }

    /// Creates an orchestrator with components built from `config`.
    #[must_use]
    pub fn from_config(queue: TaskQueue, config: &EngineConfig) -> Self {
        let limiter = if config.rate_limit.enabled {
            AdaptiveRateLimiter::new(config.rate_limit.to_config())
        } else {
            AdaptiveRateLimiter::disabled()
        };
        Self::new(
            queue,
            limiter,
            config.retry.to_policy(),
            config.orchestrator.clone(),
        )
    }

    fn shared_mut(&mut self) -> Option<&mut Shared> {
        Arc::get_mut(&mut self.shared)
    }

    /// Sets the resolver run on submitted URLs without an explicit kind.
    ///
    /// Only effective before the first `start`.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.resolver = Some(resolver);
        }
        self
    }

    /// Sets the provider asked for credentials once per task.
    ///
    /// Only effective before the first `start`.
    #[must_use]
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.credentials = Some(provider);
        }
        self
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.shared.queue
    }

    /// Adds a strategy; the chain stays sorted by descending priority.
    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        info!(
            strategy = strategy.name(),
            priority = strategy.priority(),
            "registering strategy"
        );
        self.shared
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(strategy);
    }

    /// Submits one URL.
    ///
    /// With `kind` given the URL is used as is; otherwise the configured
    /// resolver (or [`classify_url`]) decides the kind and canonical URL.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotAccepting`] after `stop`,
    /// [`OrchestratorError::Resolve`] if resolution fails, or
    /// [`OrchestratorError::Queue`] if validation or persistence fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn submit(
        &self,
        url: &str,
        kind: Option<TaskKind>,
        priority: i64,
    ) -> Result<TaskId, OrchestratorError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(OrchestratorError::NotAccepting);
        }

        let mut new_task = match (kind, &self.shared.resolver) {
            (Some(kind), _) => NewTask::new(url.trim(), kind),
            (None, Some(resolver)) => {
                let resolved = resolver.resolve(url).await?;
                let task = NewTask::new(resolved.canonical_url, resolved.kind);
                match resolved.extracted_id {
                    Some(id) => task.with_meta("extracted_id", id),
                    None => task,
                }
            }
            (None, None) => NewTask::new(url.trim(), classify_url(url)),
        };
        new_task = new_task
            .priority(priority)
            .max_attempts(self.shared.settings.default_max_attempts)
            .with_meta("source_url", url);

        Ok(self.shared.queue.submit(new_task).await?)
    }

    /// Submits URLs in order, giving earlier ones higher priority
    /// (`len - index`, capped at [`MAX_PRIORITY`]).
    ///
    /// Returns one result per input URL; an invalid URL does not stop the
    /// rest of the batch.
    #[instrument(skip(self, urls), fields(count = urls.len()))]
    pub async fn submit_batch<S: AsRef<str>>(
        &self,
        urls: &[S],
    ) -> Vec<Result<TaskId, OrchestratorError>> {
        let total = urls.len();
        let mut results = Vec::with_capacity(total);
        for (index, url) in urls.iter().enumerate() {
            let priority = batch_priority(total, index);
            let result = self.submit(url.as_ref(), None, priority).await;
            if let Err(e) = &result {
                warn!(url = url.as_ref(), error = %e, "batch entry rejected");
            }
            results.push(result);
        }
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        info!(accepted, rejected = total - accepted, "batch submitted");
        results
    }

    /// Recovers the queue and spawns `max_concurrency` workers plus the
    /// progress checkpoint loop.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConcurrency`] outside `1..=100`,
    /// [`OrchestratorError::AlreadyRunning`] if already started, or
    /// [`OrchestratorError::Queue`] if recovery fails.
    #[instrument(skip(self))]
    pub async fn start(&self, max_concurrency: usize) -> Result<RecoveryReport, OrchestratorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(OrchestratorError::InvalidConcurrency {
                value: max_concurrency,
            });
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let report = self.shared.queue.recover_on_startup().await?;

        let shutdown = CancellationToken::new();
        let abort = CancellationToken::new();
        let workers = (0..max_concurrency)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    Arc::clone(&self.shared),
                    worker_id,
                    shutdown.clone(),
                    abort.clone(),
                ))
            })
            .collect();
        let checkpoint = self.shared.settings.checkpoint_interval().map(|interval| {
            tokio::spawn(checkpoint_loop(
                self.shared.queue.clone(),
                interval,
                shutdown.clone(),
            ))
        });

        *running = Some(Running {
            workers,
            checkpoint,
            shutdown,
            abort,
        });
        self.worker_count.store(max_concurrency, Ordering::SeqCst);
        self.accepting.store(true, Ordering::SeqCst);

        info!(
            workers = max_concurrency,
            recovered = report.recovered.len(),
            pending = report.pending,
            "orchestrator started"
        );
        Ok(report)
    }

    /// Whether workers are running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stops accepting tasks and waits for in-flight tasks to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.shutdown(None).await;
    }

    /// Like [`stop`](Self::stop), but after `grace` aborts in-flight tasks and
    /// releases them back to `pending`.
    #[instrument(skip(self), fields(grace_ms = grace.as_millis()))]
    pub async fn stop_within(&self, grace: Duration) {
        self.shutdown(Some(grace)).await;
    }

    async fn shutdown(&self, grace: Option<Duration>) {
        self.accepting.store(false, Ordering::SeqCst);
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        info!("stopping orchestrator");
        running.shutdown.cancel();

        let mut remaining = Vec::new();
        match grace {
            None => remaining = running.workers,
            Some(grace) => {
                let deadline = Instant::now() + grace;
                for mut handle in running.workers {
                    match tokio::time::timeout_at(deadline, &mut handle).await {
                        Ok(joined) => log_join(joined),
                        Err(_) => remaining.push(handle),
                    }
                }
                if !remaining.is_empty() {
                    warn!(
                        workers = remaining.len(),
                        "grace period elapsed, aborting in-flight tasks"
                    );
                    running.abort.cancel();
                }
            }
        }
        for handle in remaining {
            log_join(handle.await);
        }
        if let Some(checkpoint) = running.checkpoint {
            log_join(checkpoint.await);
        }

        self.worker_count.store(0, Ordering::SeqCst);
        info!("orchestrator stopped");
    }

    /// Waits until no task is pending, retrying or processing.
    ///
    /// Returns `true` at the first quiescent point observed, `false` if
    /// `timeout` elapses first. Cancels nothing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Queue`] if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn wait_until_idle(&self, timeout: Option<Duration>) -> Result<bool, OrchestratorError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.shared.queue.pending_or_active_count().await? == 0 {
                debug!("queue is idle");
                return Ok(true);
            }
            let next_poll = Instant::now() + IDLE_POLL_INTERVAL;
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(false),
                Some(deadline) => tokio::time::sleep_until(next_poll.min(deadline)).await,
                None => tokio::time::sleep_until(next_poll).await,
            }
        }
    }

    /// Current status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Queue`] if the lookup fails.
    pub async fn get_task_status(&self, id: &TaskId) -> Result<Option<TaskStatus>, OrchestratorError> {
        Ok(self.shared.queue.status(id).await?)
    }

    /// Full task record.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Queue`] if the lookup fails.
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, OrchestratorError> {
        Ok(self.shared.queue.get(id).await?)
    }

    /// Queue, rate limiter and retry statistics.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Queue`] if the queue aggregates fail.
    pub async fn get_stats(&self) -> Result<OrchestratorStats, OrchestratorError> {
        let queue = self.shared.queue.stats().await?;
        let strategies = self
            .shared
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        Ok(OrchestratorStats {
            queue,
            rate_limiter: self.shared.limiter.stats().await,
            retry: self.shared.retry.stats(),
            active_workers: self.shared.active.load(Ordering::SeqCst),
            workers: self.worker_count.load(Ordering::SeqCst),
            strategies,
        })
    }

    /// Subscribes to task transition events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.queue.subscribe()
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "background task panicked");
    }
}

async fn worker_loop(
    shared: Arc<Shared>,
    worker_id: usize,
    shutdown: CancellationToken,
    abort: CancellationToken,
) {
    debug!(worker_id, "worker started");
    let dequeue_timeout = shared.settings.dequeue_timeout();

    // Dequeue is not cancellation safe, so shutdown is polled between calls.
    while !shutdown.is_cancelled() {
        let task = match shared.queue.dequeue(dequeue_timeout).await {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) if e.is_transient() => {
                debug!(worker_id, error = %e, "store busy, backing off");
                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                continue;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "dequeue failed");
                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                continue;
            }
        };

        shared.active.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            () = abort.cancelled() => {
                warn!(worker_id, task_id = %task.id, "attempt aborted, releasing task");
                if let Err(e) = shared.queue.release(&task.id).await {
                    warn!(task_id = %task.id, error = %e, "failed to release aborted task");
                }
            }
            () = shared.process(&task) => {}
        }
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker_id, "worker stopped");
}

async fn checkpoint_loop(queue: TaskQueue, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = queue.save_snapshot().await {
                    warn!(error = %e, "failed to save progress snapshot");
                }
            }
        }
    }
    if let Err(e) = queue.save_snapshot().await {
        warn!(error = %e, "failed to save final progress snapshot");
    }
}

/// Priority of the `index`th URL in a batch of `total`. Batches longer than
/// [`MAX_PRIORITY`] share the top priority at their head and fall back to
/// submission order there.
fn batch_priority(total: usize, index: usize) -> i64 {
    i64::try_from(total.saturating_sub(index))
        .unwrap_or(i64::MAX)
        .min(MAX_PRIORITY)
}

impl Shared {
    #[instrument(skip(self, task), fields(task_id = %task.id, url = %task.url, attempt = task.attempt_count + 1))]
    async fn process(&self, task: &Task) {
        let chain = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let credentials = match &self.credentials {
            Some(provider) => provider.current_credentials().await,
            None => None,
        };

        // Every download call, across strategies and in-place retries, draws
        // from the task's one attempt budget.
        let mut remaining = u32::try_from(task.max_attempts - task.attempt_count)
            .unwrap_or(0)
            .max(1);
        let mut used = 0u32;
        let mut last: Option<AttemptResult> = None;
        let mut any_retryable = false;
        for strategy in chain.applicable(task) {
            if remaining == 0 {
                debug!(strategy = strategy.name(), "attempt budget spent, skipping");
                break;
            }
            let result = self
                .run_strategy(strategy.as_ref(), task, credentials.as_ref(), remaining)
                .await;
            used = used.saturating_add(result.attempts());
            remaining = remaining.saturating_sub(result.attempts());
            if result.is_success() {
                info!(
                    strategy = strategy.name(),
                    attempts = result.attempts(),
                    artifacts = result.artifacts().len(),
                    "strategy succeeded"
                );
                last = Some(result);
                break;
            }
            any_retryable |= result.is_retryable();
            warn!(
                strategy = strategy.name(),
                attempts = result.attempts(),
                error = result.error().map(ToString::to_string).unwrap_or_default(),
                "strategy failed"
            );
            last = Some(result);
        }

        let result = last.unwrap_or_else(|| {
            warn!("no strategy can handle task");
            AttemptResult::failure(
                AttemptError::NoStrategy {
                    url: task.url.clone(),
                },
                FailureType::Permanent,
                Duration::ZERO,
                0,
            )
        });
        self.finish(task, &result, any_retryable, used).await;
    }

    /// One strategy call under the retry policy, at most `budget` attempts,
    /// each gated by the rate limiter.
    async fn run_strategy(
        &self,
        strategy: &dyn Strategy,
        task: &Task,
        credentials: Option<&Credentials>,
        budget: u32,
    ) -> AttemptResult {
        let limiter = &self.limiter;
        self.retry
            .execute_within(&task.id, budget, move |attempt| async move {
                if !limiter.acquire().await {
                    return Err(AttemptError::RateLimited {
                        url: task.url.clone(),
                    });
                }
                debug!(attempt, strategy = strategy.name(), "attempting");
                let outcome = strategy.download(task, credentials).await;
                if let Err(error) = &outcome {
                    limiter.record_failure().await;
                    if let Some(delay) = error.retry_after() {
                        limiter.set_cooldown(delay).await;
                    }
                }
                outcome
            })
            .await
    }

    /// Records the outcome of one delivery that made `used` download calls.
    async fn finish(&self, task: &Task, result: &AttemptResult, any_retryable: bool, used: u32) {
        // A task with no applicable strategy still spends one attempt.
        let used = used.max(1);
        let attempt_count = u32::try_from(task.attempt_count)
            .unwrap_or(u32::MAX)
            .saturating_add(used);

        let outcome = if result.is_success() || !any_retryable {
            self.queue
                .complete(&task.id, &result.to_completion(attempt_count))
                .await
                .map(|_| ())
        } else {
            let error = result.error().map(ToString::to_string).unwrap_or_default();
            self.queue.requeue_after(&task.id, &error, used).await.map(|outcome| {
                if let RequeueOutcome::Exhausted { attempt_count } = outcome {
                    warn!(attempt_count, "task failed after exhausting attempts");
                }
            })
        };

        if let Err(e) = outcome {
            warn!(task_id = %task.id, error = %e, "failed to record task outcome");
        }
    }
}
