//! Mediafetch Core Library
//!
//! A durable, prioritized, rate-limited pipeline for fetching media posts by
//! URL through interchangeable retrieval backends. A batch survives process
//! restarts: every task lives in `SQLite`, and work interrupted by a crash is
//! handed out again on the next start.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Immutable engine configuration (TOML)
//! - [`db`] - Database connection and schema management
//! - [`queue`] - Durable task store and priority delivery
//! - [`download`] - Rate limiter, retry policy, strategies, orchestrator
//! - [`events`] - Task transition events
//! - [`resolver`] - URL classification at submission
//! - [`credentials`] - Credential snapshots for strategies

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod db;
pub mod download;
pub mod events;
pub mod queue;
pub mod resolver;

// Re-export commonly used types
pub use config::{ConfigError, DEFAULT_CONCURRENCY, EngineConfig};
pub use credentials::{CredentialProvider, Credentials, StaticCredentials};
pub use db::{Database, DbError};
pub use download::{
    AdaptiveRateLimiter, AttemptError, AttemptResult, FailureType, HttpStrategy, Orchestrator,
    OrchestratorError, OrchestratorStats, RateLimitConfig, RetryPolicy, Strategy,
};
pub use events::TaskEvent;
pub use queue::{NewTask, QueueError, QueueStats, Task, TaskId, TaskKind, TaskQueue, TaskStatus};
pub use resolver::{PatternResolver, ResolveError, ResolvedUrl, UrlResolver, classify_url};
