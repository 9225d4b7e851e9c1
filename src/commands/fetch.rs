//! Fetch command: submit URLs, run the workers, wait for the queue to drain.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mediafetch_core::{
    EngineConfig, HttpStrategy, Orchestrator, PatternResolver, StaticCredentials,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::open_queue;
use super::progress::spawn_progress_ui;
use crate::cli::FetchArgs;

/// Reads URLs from the arguments, or one per line from piped stdin.
fn collect_urls(args: &FetchArgs) -> Result<Vec<String>> {
    if !args.urls.is_empty() {
        return Ok(args.urls.clone());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read URLs from stdin")?;
    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Applies command-line overrides on top of the file configuration.
fn apply_overrides(mut config: EngineConfig, args: &FetchArgs) -> EngineConfig {
    if let Some(concurrency) = args.concurrency {
        config.orchestrator.max_concurrency = usize::from(concurrency);
    }
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    match args.rate_limit {
        Some(0) => config.rate_limit.enabled = false,
        Some(per_second) => {
            config.rate_limit.enabled = true;
            config.rate_limit.max_per_second = per_second;
            config.rate_limit.min_per_second = config.rate_limit.min_per_second.min(per_second);
        }
        None => {}
    }
    config
}

pub async fn run_fetch_command(config: EngineConfig, args: &FetchArgs) -> Result<()> {
    let config = apply_overrides(config, args);
    config.validate().context("invalid configuration")?;

    let urls = collect_urls(args)?;
    let queue = open_queue(&config).await?;

    let mut orchestrator =
        Orchestrator::from_config(queue.clone(), &config).with_resolver(Arc::new(PatternResolver::new()));
    if let Some(cookies) = args.cookies.as_deref() {
        orchestrator =
            orchestrator.with_credentials(Arc::new(StaticCredentials::from_cookie_string(cookies)));
    }
    orchestrator.register_strategy(Arc::new(
        HttpStrategy::new().context("failed to build HTTP client")?,
    ));

    let results = orchestrator.submit_batch(&urls).await;
    let rejected = results.iter().filter(|r| r.is_err()).count();
    info!(submitted = results.len() - rejected, rejected, "URLs submitted");

    let outstanding = queue.pending_or_active_count().await?;
    if outstanding == 0 {
        info!("Nothing to fetch. Pass URLs as arguments or pipe them via stdin.");
        return Ok(());
    }

    let stop_progress = CancellationToken::new();
    let progress = spawn_progress_ui(
        !args.no_progress,
        orchestrator.subscribe(),
        outstanding,
        stop_progress.clone(),
    );

    let report = orchestrator
        .start(config.orchestrator.max_concurrency)
        .await?;
    if !report.recovered.is_empty() {
        warn!(
            recovered = report.recovered.len(),
            "resuming tasks interrupted by a previous run"
        );
    }

    let timeout = args.timeout.map(Duration::from_secs);
    tokio::select! {
        idle = orchestrator.wait_until_idle(timeout) => {
            if !idle? {
                warn!("timed out waiting for the queue to drain");
            }
            orchestrator.stop().await;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            warn!(grace_secs = args.grace, "interrupted, stopping");
            orchestrator.stop_within(Duration::from_secs(args.grace)).await;
        }
    }

    stop_progress.cancel();
    if let Some(handle) = progress
        && let Err(e) = handle.await
    {
        debug!(error = %e, "progress task ended abnormally");
    }

    let stats = orchestrator.get_stats().await?;
    info!(
        completed = stats.queue.completed,
        failed = stats.queue.failed,
        pending = stats.queue.outstanding(),
        retries = stats.retry.total_retries,
        "Fetch finished"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Args, Command};

    fn fetch_args(argv: &[&str]) -> FetchArgs {
        let mut full = vec!["mediafetch", "fetch"];
        full.extend_from_slice(argv);
        match Args::try_parse_from(full).unwrap().command {
            Command::Fetch(args) => args,
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_zero_disables_limiter() {
        let config = apply_overrides(EngineConfig::default(), &fetch_args(&["-l", "0"]));
        assert!(!config.rate_limit.enabled);
    }

    #[test]
    fn test_overrides_apply_to_sections() {
        let config = apply_overrides(
            EngineConfig::default(),
            &fetch_args(&["-c", "8", "-r", "5", "-l", "4"]),
        );
        assert_eq!(config.orchestrator.max_concurrency, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.rate_limit.max_per_second, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collect_urls_prefers_arguments() {
        let args = fetch_args(&["https://example.com/video/1"]);
        assert_eq!(collect_urls(&args).unwrap(), vec!["https://example.com/video/1"]);
    }
}
