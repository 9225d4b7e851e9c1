//! SQLite pool and schema for the task store.
//!
//! File-backed stores run in WAL mode so readers (stats, export) never block
//! the workers' writes. Migrations under `migrations/` run on every open.
//!
//! # Example
//!
//! ```no_run
//! use mediafetch_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("mediafetch.db")).await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tracing::{debug, instrument};

/// SQLite serializes writers, so a handful of connections is plenty.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open task store: {0}")]
    Open(#[from] sqlx::Error),

    #[error("failed to migrate task store: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Pool tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    /// How long a connection waits on another writer's lock.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Cheaply cloneable handle to the store's connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the store at `db_path` with default options.
    ///
    /// # Errors
    ///
    /// See [`Database::with_options`].
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        Self::with_options(db_path, DatabaseOptions::default()).await
    }

    /// Opens (creating if needed) the store at `db_path` and brings its
    /// schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Open`] if the file cannot be opened and
    /// [`DbError::Migrate`] if a migration fails.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn with_options(db_path: &Path, options: DatabaseOptions) -> Result<Self, DbError> {
        let connect = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        Self::migrated(pool).await
    }

    /// Opens a private in-memory store, used by tests.
    ///
    /// # Errors
    ///
    /// Same as [`Database::with_options`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        // Every connection to `:memory:` is its own database, so the pool
        // must hold exactly one and never recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with("sqlite::memory:".parse::<SqliteConnectOptions>()?)
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("task store schema is current");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The active journal mode, lowercased (`wal`, `memory`, `delete`).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Open`] if the pragma cannot be read.
    pub async fn journal_mode(&self) -> Result<String, DbError> {
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_ascii_lowercase())
    }

    /// Waits for checked-out connections and closes the pool.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn table_names(db: &Database) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' AND name NOT LIKE 'sqlite%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_create_both_tables() {
        let db = Database::new_in_memory().await.unwrap();
        assert_eq!(table_names(&db).await, vec!["progress_snapshots", "tasks"]);
    }

    #[tokio::test]
    async fn test_schema_rejects_unknown_status() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO tasks (id, seq, url, kind, status) VALUES ('a', 1, 'https://example.com', 'video', 'paused')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_seq_is_unique() {
        let db = Database::new_in_memory().await.unwrap();
        let insert = "INSERT INTO tasks (id, seq, url, kind) VALUES (?, 7, 'https://example.com', 'video')";

        sqlx::query(insert).bind("a").execute(db.pool()).await.unwrap();
        assert!(sqlx::query(insert).bind("b").execute(db.pool()).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_uses_wal_and_reopens() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("store.db");

        let db = Database::new(&db_path).await.unwrap();
        assert_eq!(db.journal_mode().await.unwrap(), "wal");
        sqlx::query("INSERT INTO tasks (id, seq, url, kind) VALUES ('a', 1, 'https://example.com', 'video')")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let reopened = Database::new(&db_path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(reopened.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
