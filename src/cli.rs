//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use mediafetch_core::TaskStatus;

/// Durable, rate-limited batch fetching of media posts.
///
/// Every submitted URL is stored in a local SQLite queue, so an interrupted
/// batch picks up where it left off on the next run.
#[derive(Parser, Debug)]
#[command(name = "mediafetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "MEDIAFETCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue database path (overrides the config file)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit URLs and run until the queue is idle
    Fetch(FetchArgs),
    /// Print queue statistics
    Stats(StatsArgs),
    /// Export tasks as JSON
    Export(ExportArgs),
    /// Delete finished tasks older than N days
    Cleanup(CleanupArgs),
    /// Return tasks interrupted by a crash to the queue
    Recover,
}

#[derive(ClapArgs, Debug)]
pub struct FetchArgs {
    /// URLs to fetch (reads stdin, one per line, when omitted)
    pub urls: Vec<String>,

    /// Maximum concurrent workers (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// In-place attempts per strategy call (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Requests per second ceiling (0 disables rate limiting)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub rate_limit: Option<u32>,

    /// Cookie string passed to strategies (`name=value; name2=value2`)
    #[arg(long, env = "MEDIAFETCH_COOKIES", hide_env_values = true)]
    pub cookies: Option<String>,

    /// Give up waiting after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds to let in-flight tasks finish after Ctrl-C
    #[arg(long, default_value_t = 10)]
    pub grace: u64,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// CLI-facing task status filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl From<StatusFilter> for TaskStatus {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Processing => Self::Processing,
            StatusFilter::Retrying => Self::Retrying,
            StatusFilter::Completed => Self::Completed,
            StatusFilter::Failed => Self::Failed,
        }
    }
}

#[derive(ClapArgs, Debug)]
pub struct ExportArgs {
    /// Only tasks in this status
    #[arg(long, value_enum)]
    pub status: Option<StatusFilter>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct CleanupArgs {
    /// Minimum age in days of the tasks to delete
    #[arg(long, default_value_t = 30)]
    pub days: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_fetch_parses_urls() {
        let args = Args::try_parse_from([
            "mediafetch",
            "fetch",
            "https://example.com/video/1",
            "https://example.com/video/2",
        ])
        .unwrap();
        match args.command {
            Command::Fetch(fetch) => {
                assert_eq!(fetch.urls.len(), 2);
                assert_eq!(fetch.grace, 10);
                assert!(fetch.concurrency.is_none());
            }
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_verbose_is_global() {
        let args = Args::try_parse_from(["mediafetch", "stats", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_concurrency_range() {
        for bad in ["0", "101"] {
            let err = Args::try_parse_from(["mediafetch", "fetch", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
        let args = Args::try_parse_from(["mediafetch", "fetch", "-c", "100"]).unwrap();
        assert!(matches!(args.command, Command::Fetch(FetchArgs { concurrency: Some(100), .. })));
    }

    #[test]
    fn test_cli_export_status_filter() {
        let args = Args::try_parse_from(["mediafetch", "export", "--status", "failed"]).unwrap();
        match args.command {
            Command::Export(export) => {
                assert_eq!(export.status.map(TaskStatus::from), Some(TaskStatus::Failed));
            }
            other => panic!("expected export, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_cleanup_default_days() {
        let args = Args::try_parse_from(["mediafetch", "cleanup"]).unwrap();
        assert!(matches!(args.command, Command::Cleanup(CleanupArgs { days: 30 })));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Args::try_parse_from(["mediafetch"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingSubcommand);
    }
}
