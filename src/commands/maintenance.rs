//! Queue maintenance commands: stats, export, cleanup, recover.

use std::time::Duration;

use anyhow::{Context, Result};
use mediafetch_core::{EngineConfig, TaskStatus};
use tracing::info;

use super::open_queue;
use crate::cli::{CleanupArgs, ExportArgs, StatsArgs};

const SECONDS_PER_DAY: u64 = 86_400;

pub async fn run_stats_command(config: &EngineConfig, args: &StatsArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    let stats = queue.stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Total:      {}", stats.total);
    println!("Pending:    {}", stats.pending);
    println!("Processing: {}", stats.processing);
    println!("Retrying:   {}", stats.retrying);
    println!("Completed:  {}", stats.completed);
    println!("Failed:     {}", stats.failed);
    println!("Retried:    {}", stats.retried);
    println!("Success:    {:.1}%", stats.success_rate);
    println!("Avg time:   {:.0} ms", stats.average_duration_ms);
    Ok(())
}

pub async fn run_export_command(config: &EngineConfig, args: &ExportArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    let filter = args.status.map(TaskStatus::from);
    let tasks = queue.export_tasks(filter).await?;

    let rows: Vec<serde_json::Value> = tasks.iter().map(mediafetch_core::Task::to_json).collect();
    let rendered = serde_json::to_string_pretty(&rows)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(count = rows.len(), path = %path.display(), "tasks exported");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

pub async fn run_cleanup_command(config: &EngineConfig, args: &CleanupArgs) -> Result<()> {
    let queue = open_queue(config).await?;
    let older_than = Duration::from_secs(args.days.saturating_mul(SECONDS_PER_DAY));
    let removed = queue.cleanup_finished(older_than).await?;
    println!("Removed {removed} finished task(s) older than {} day(s).", args.days);
    Ok(())
}

pub async fn run_recover_command(config: &EngineConfig) -> Result<()> {
    let queue = open_queue(config).await?;
    let report = queue.recover_on_startup().await?;
    println!(
        "Recovered {} interrupted task(s); {} task(s) pending.",
        report.recovered.len(),
        report.pending
    );
    Ok(())
}
