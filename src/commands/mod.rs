//! CLI command handlers.

mod fetch;
mod maintenance;
mod progress;

use anyhow::{Context, Result};
use mediafetch_core::{Database, EngineConfig, TaskQueue};
use tracing::debug;

pub use fetch::run_fetch_command;
pub use maintenance::{
    run_cleanup_command, run_export_command, run_recover_command, run_stats_command,
};

/// Opens the configured task store.
async fn open_queue(config: &EngineConfig) -> Result<TaskQueue> {
    let path = &config.database.path;
    debug!(path = %path.display(), "opening task store");
    let db = Database::with_options(path, config.database.options())
        .await
        .with_context(|| format!("failed to open task store at {}", path.display()))?;
    Ok(TaskQueue::new(db))
}
