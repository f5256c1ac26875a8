//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// TourFeed - resilient realtime subscriptions
#[derive(Parser)]
#[command(
    name = "tf",
    about = "Keep realtime feeds alive with backoff, circuit breaking and polling fallback",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/tourfeed/logs/tourfeed.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Subscribe to table changes and print them until Ctrl-C
    Watch {
        /// Table to watch; defaults to the channels listed in the config file
        #[arg(short, long)]
        table: Option<String>,

        /// Row filter, e.g. agent_id=eq.7
        #[arg(short, long, requires = "table")]
        filter: Option<String>,

        /// Channel name (defaults to the table name)
        #[arg(long, requires = "table")]
        channel: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the retry schedule and circuit breaker settings
    Backoff,

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Output format for streamed events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Output format for `tf config`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tourfeed")
        .join("logs")
        .join("tourfeed.log")
}
