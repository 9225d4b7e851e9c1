//! Retrieval backends.
//!
//! A [`Strategy`] performs one attempt at a task and reports what it produced
//! or a typed [`AttemptError`]. Expected failures (HTTP 404, timeouts) are
//! values, never panics. The orchestrator only sees this trait; retries and
//! rate limiting wrap around it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::AttemptError;
use super::outcome::Artifact;
use crate::credentials::Credentials;
use crate::queue::Task;

/// A pluggable retrieval backend.
///
/// Uses `async_trait` so chains can hold `Arc<dyn Strategy>`.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short name used in logs and results.
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this backend can attempt `task` at all.
    fn can_handle(&self, task: &Task) -> bool;

    /// Performs one attempt.
    async fn download(
        &self,
        task: &Task,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<Artifact>, AttemptError>;
}

/// Strategies ordered by descending priority.
///
/// Equal priorities keep registration order.
#[derive(Clone, Default)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| (s.name(), s.priority())))
            .finish()
    }
}

impl StrategyChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.push(strategy);
        // sort_by_key is stable
        self.strategies
            .sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Strategies able to handle `task`, in run order.
    pub fn applicable<'a>(&'a self, task: &'a Task) -> impl Iterator<Item = &'a Arc<dyn Strategy>> {
        self.strategies.iter().filter(move |s| s.can_handle(task))
    }
}
