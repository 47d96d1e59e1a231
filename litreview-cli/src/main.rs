//! LitReview CLI: follow literature-review pipeline runs from the terminal.
//!
//! Submits runs to the pipeline backend, renders live stage progress, and
//! inspects the persisted run history.

mod commands;
mod render;

use clap::Parser;
use litreview_core::types::DEFAULT_MAX_PAPERS;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// LitReview: live progress for literature-review pipeline runs
#[derive(Parser, Debug)]
#[command(name = "litreview", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Start a pipeline run and follow it until it finishes
    Run {
        /// Search keywords
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Maximum number of papers to retrieve (1-500)
        #[arg(short, long, default_value_t = DEFAULT_MAX_PAPERS)]
        max_papers: u32,
    },
    /// Show the backend status of a run
    Status {
        /// Session id returned when the run was started
        session_id: String,
    },
    /// List or clear the persisted run history
    History {
        /// Remove every recorded run
        #[arg(long)]
        clear: bool,
    },
    /// Check that the backend is reachable
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default configuration file to the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "litreview", "litreview")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "litreview.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_max_papers() {
        let cli = Cli::try_parse_from(["litreview", "run", "nlp", "graphs", "--max-papers", "20"])
            .unwrap();
        match cli.command {
            Commands::Run {
                keywords,
                max_papers,
            } => {
                assert_eq!(keywords, vec!["nlp", "graphs"]);
                assert_eq!(max_papers, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["litreview", "-vv", "run", "nlp"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Run { max_papers: 50, .. }
        ));
    }

    #[test]
    fn test_run_requires_keywords() {
        assert!(Cli::try_parse_from(["litreview", "run"]).is_err());
    }

    #[test]
    fn test_parse_history_clear() {
        let cli = Cli::try_parse_from(["litreview", "history", "--clear"]).unwrap();
        assert!(matches!(cli.command, Commands::History { clear: true }));
    }
}
