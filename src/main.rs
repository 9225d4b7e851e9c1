//! CLI entry point for mediafetch.

use anyhow::{Context, Result};
use clap::Parser;
use mediafetch_core::EngineConfig;
use tracing::debug;

mod cli;
mod commands;

use cli::{Args, Command};

/// Loads the file configuration (or defaults) and applies global overrides.
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(db) = &args.db {
        config.database.path.clone_from(db);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    let config = load_config(&args)?;

    match &args.command {
        Command::Fetch(fetch) => commands::run_fetch_command(config, fetch).await,
        Command::Stats(stats) => commands::run_stats_command(&config, stats).await,
        Command::Export(export) => commands::run_export_command(&config, export).await,
        Command::Cleanup(cleanup) => commands::run_cleanup_command(&config, cleanup).await,
        Command::Recover => commands::run_recover_command(&config).await,
    }
}
