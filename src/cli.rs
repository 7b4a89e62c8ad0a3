//! Command-line interface for regwatch.
//!
//! Every option can also come from the environment, so the same binary runs
//! unchanged under a process supervisor or a container.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Shortest allowed gap between scheduled rounds.
pub const MIN_SCRAPE_INTERVAL_SECS: u64 = 60;

/// Command-line arguments for regwatch.
///
/// # Examples
///
/// ```sh
/// # Harvest every configured source once
/// regwatch --data-dir ./data harvest
///
/// # Harvest two sources with a custom source file
/// regwatch --config ./sources.yaml harvest fma rbnz
///
/// # Re-harvest every 30 minutes until Ctrl-C
/// SCRAPE_INTERVAL=1800 regwatch watch
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a sources YAML file (the built-in set is used otherwise)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding one CSV result file per source
    #[arg(short, long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Seconds between scheduled rounds in `watch` mode (at least 60)
    #[arg(long, env = "SCRAPE_INTERVAL", default_value_t = 3600)]
    pub scrape_interval: u64,

    /// Seconds after which a single source run is cancelled
    #[arg(long, env = "RUN_TIMEOUT")]
    pub run_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Harvest the named sources once (all sources when none are named)
    Harvest { names: Vec<String> },
    /// Harvest every source now and then on the scrape interval until Ctrl-C
    Watch,
    /// List sources with the time their results were last written
    List,
    /// Print the stored items of one source
    Show { name: String },
}

impl Cli {
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval.max(MIN_SCRAPE_INTERVAL_SECS))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout.filter(|s| *s > 0).map(Duration::from_secs)
    }
}
