//! Execution side of the engine: rate limiting, retries, strategies and the
//! worker pool that ties them to the queue.
//!
//! # Overview
//!
//! - [`AdaptiveRateLimiter`] - sliding windows, cooldown, closed-loop caps
//! - [`RetryPolicy`] - classification and backoff around one attempt function
//! - [`Strategy`] / [`StrategyChain`] - pluggable retrieval backends
//! - [`HttpStrategy`] - reference backend over `reqwest`
//! - [`Orchestrator`] - worker pool over all of the above
//!
//! Strategies return `Result<Vec<Artifact>, AttemptError>`; the retry policy
//! turns those into an [`AttemptResult`], and the orchestrator turns that into
//! a queue transition.

mod error;
mod http;
mod orchestrator;
mod outcome;
pub mod rate_limiter;
mod retry;
mod strategy;

pub use error::AttemptError;
pub use http::{CONNECT_TIMEOUT, HttpStrategy, READ_TIMEOUT};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorStats};
pub use outcome::{Artifact, AttemptOutcome, AttemptResult};
pub use rate_limiter::{
    AdaptiveRateLimiter, RateLimitConfig, RateLimitMode, RateLimiterStats, parse_retry_after,
};
pub use retry::{
    Backoff, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, RetryStats,
    classify_error, classify_http_status, classify_message,
};
pub use strategy::{Strategy, StrategyChain};
