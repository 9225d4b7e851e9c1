//! Error classification and in-place retry with backoff.
//!
//! A failed attempt is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed on retry (timeouts, 5xx, empty bodies)
//! - [`FailureType::RateLimited`] - the server pushed back (429); retried
//! - [`FailureType::Permanent`] - retrying cannot help (404, 410, "deleted")
//! - [`FailureType::NeedsAuth`] - 401/403; treated as permanent
//!
//! [`RetryPolicy::execute`] wraps one attempt function, sleeping between
//! retryable failures until the attempt ceiling is reached.
//!
//! # Example
//!
//! ```
//! use mediafetch_core::download::{
//!     AttemptError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = AttemptError::http_status("https://example.com/video/1", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::error::AttemptError;
use super::outcome::{Artifact, AttemptResult};
use crate::queue::TaskId;

/// Default maximum attempts per strategy call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First exponential delay.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Exponential delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter as a fraction of the delay.
const DEFAULT_JITTER: f64 = 0.3;

/// Markers that make an unstructured message retryable. Checked first.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "429",
    "502",
    "503",
    "504",
    "empty response",
    "temporary",
];

/// Markers that make an unstructured message permanent.
const PERMANENT_MARKERS: &[&str] = &["404", "403", "401", "invalid", "not found", "deleted"];

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// Failure that will not succeed regardless of retries.
    Permanent,

    /// Authentication or authorization required.
    NeedsAuth,

    /// Server rate limiting (HTTP 429) or a refused local permit.
    RateLimited,
}

impl FailureType {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::NeedsAuth => "needs_auth",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// How the delay between attempts grows.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// `min(base * 2^(attempt-1), max)`.
    Exponential { base: Duration, max: Duration },
    /// Fixed delays per retry; the last entry repeats.
    Table(Vec<Duration>),
}

impl Backoff {
    fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1 << exponent).min(*max)
            }
            Self::Table(delays) => {
                let index = (attempt.saturating_sub(1) as usize).min(delays.len().saturating_sub(1));
                delays.get(index).copied().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Cumulative retry counters. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Retries scheduled (sleeps taken).
    pub total_retries: u64,
    /// Calls that succeeded after at least one retry.
    pub successful_retries: u64,
    /// Calls that ran out of attempts on a retryable error.
    pub exhausted: u64,
}

/// In-place retry policy for one strategy call.
///
/// Shared by reference across workers; the counters are atomic.
#[derive(Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    backoff: Backoff,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    jitter: f64,
    total_retries: AtomicU64,
    successful_retries: AtomicU64,
    exhausted: AtomicU64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: DEFAULT_JITTER,
            total_retries: AtomicU64::new(0),
            successful_retries: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    /// Exponential backoff from 1 s, capped at 30 s.
    #[must_use]
    pub fn exponential(max_attempts: u32) -> Self {
        Self::with_backoff(
            max_attempts,
            Backoff::Exponential {
                base: DEFAULT_BASE_DELAY,
                max: DEFAULT_MAX_DELAY,
            },
        )
    }

    /// Backoff from a fixed delay table.
    #[must_use]
    pub fn with_delay_table(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self::with_backoff(max_attempts, Backoff::Table(delays))
    }

    /// Retries without sleeping.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::with_backoff(max_attempts, Backoff::Table(vec![Duration::ZERO])).with_jitter(0.0)
    }

    /// Replaces the jitter fraction (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        self.decide(failure_type, attempt, self.max_attempts)
    }

    fn decide(&self, failure_type: FailureType, attempt: u32, ceiling: u32) -> RetryDecision {
        if !failure_type.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("{} failure - retry would not help", failure_type.as_str()),
            };
        }

        if attempt >= ceiling {
            debug!(attempt, max = ceiling, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({ceiling}) exhausted"),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff delay after `attempt` failed, plus jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.base_delay(attempt);
        base + self.calculate_jitter(base)
    }

    fn calculate_jitter(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 || base.is_zero() {
            return Duration::ZERO;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(fraction)
    }

    /// Runs `attempt_fn` until it succeeds, fails permanently, or the
    /// ceiling is reached. `attempt_fn` receives the 1-indexed attempt number.
    ///
    /// A `Retry-After` delay carried by the error replaces the computed
    /// backoff for that retry.
    pub async fn execute<F, Fut>(&self, task_id: &TaskId, attempt_fn: F) -> AttemptResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Vec<Artifact>, AttemptError>>,
    {
        self.execute_within(task_id, self.max_attempts, attempt_fn)
            .await
    }

    /// Like [`RetryPolicy::execute`], but makes at most
    /// `min(max_attempts, budget)` calls. A zero budget still makes one call.
    ///
    /// Callers that share one attempt ceiling across several runs pass what
    /// is left of it here.
    #[instrument(skip(self, task_id, attempt_fn), fields(task_id = %task_id))]
    pub async fn execute_within<F, Fut>(
        &self,
        task_id: &TaskId,
        budget: u32,
        mut attempt_fn: F,
    ) -> AttemptResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Vec<Artifact>, AttemptError>>,
    {
        let ceiling = self.max_attempts.min(budget).max(1);
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "running attempt");

            let error = match attempt_fn(attempt).await {
                Ok(artifacts) => {
                    if attempt > 1 {
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                        info!(attempt, "attempt succeeded after retry");
                    }
                    return AttemptResult::success(artifacts, started.elapsed(), attempt);
                }
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            match self.decide(failure_type, attempt, ceiling) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay = error.retry_after().unwrap_or(backoff_delay);
                    info!(
                        attempt = next_attempt,
                        max_attempts = ceiling,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying attempt"
                    );
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if failure_type.is_retryable() {
                        self.exhausted.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(%reason, error = %error, "not retrying");
                    return AttemptResult::failure(error, failure_type, started.elapsed(), attempt);
                }
            }
        }
    }

    /// Returns the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_retries: self.total_retries.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Classifies an attempt error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, connection, empty response | Transient |
/// | Limiter refusal | RateLimited |
/// | HTTP status | see [`classify_http_status`] |
/// | No strategy | Permanent |
/// | Free-form message | see [`classify_message`] |
#[must_use]
pub fn classify_error(error: &AttemptError) -> FailureType {
    match error {
        AttemptError::Timeout { .. }
        | AttemptError::Connection { .. }
        | AttemptError::EmptyResponse { .. } => FailureType::Transient,
        AttemptError::RateLimited { .. } => FailureType::RateLimited,
        AttemptError::HttpStatus { status, .. } => classify_http_status(*status),
        AttemptError::NoStrategy { .. } => FailureType::Permanent,
        AttemptError::Other { message } => classify_message(message),
    }
}

/// Classifies an HTTP status code.
#[allow(clippy::match_same_arms)]
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        // 1xx/3xx reaching here means the backend could not follow through.
        _ => FailureType::Transient,
    }
}

/// Classifies a free-form error message.
///
/// Transient markers win over permanent ones; anything unrecognized is
/// treated as transient.
#[must_use]
pub fn classify_message(message: &str) -> FailureType {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureType::Transient;
    }
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureType::Permanent;
    }
    FailureType::Transient
}
