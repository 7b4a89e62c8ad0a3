//! # regwatch
//!
//! Watches the news and publication listings of financial regulators,
//! normalizes every item's publication date and keeps a deduplicated,
//! newest-first CSV per source that viewers can read at any time.
//!
//! ## Usage
//!
//! ```sh
//! regwatch --data-dir ./data harvest
//! regwatch watch
//! regwatch list
//! regwatch show rbnz
//! ```
//!
//! ## Architecture
//!
//! 1. **Traversal**: walk each source's listing pages (next links or a set of
//!    index pages) through a paced, retrying fetcher
//! 2. **Extraction**: a configured adapter turns each page into entries
//! 3. **Resolution**: undated entries get their date from the article page,
//!    a bounded number of fetches at a time
//! 4. **Persistence**: normalize, dedupe, sort and atomically write the
//!    source's CSV file

use clap::Parser;
use itertools::Itertools;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dates;
mod error;
mod fetcher;
mod harvest;
mod models;
mod pool;
mod scheduler;
mod scrapers;
mod store;
#[cfg(test)]
mod testing;
mod traversal;
mod utils;

use cli::{Cli, Command};
use config::AppConfig;
use fetcher::{Fetcher, HttpFetch, RetryPolicy};
use scheduler::Scheduler;
use store::ResultStore;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::builtin()?,
    };
    let sources = config.build_sources()?;
    info!(sources = sources.len(), "Loaded source configuration");

    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let fetcher = Fetcher::new(
        HttpFetch::new(&config.fetcher)?,
        RetryPolicy::from_config(&config.fetcher),
    );
    let store = ResultStore::new(&args.data_dir, &sources);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; cancelling running harvests");
                shutdown.cancel();
            }
        });
    }

    let scheduler = Arc::new(Scheduler::new(
        fetcher,
        sources,
        store,
        args.run_timeout(),
        shutdown,
    ));

    match args.command {
        Command::Harvest { names } => {
            let names = if names.is_empty() {
                scheduler.source_names()
            } else {
                names
            };
            let results = scheduler.run_many(names).await;
            for (name, res) in &results {
                match res {
                    Ok(report) => println!(
                        "{name}: {} items, {}, {} pages ({} failed), {} articles failed, stopped: {}{}",
                        report.items.len(),
                        report
                            .stored_rows
                            .map(|rows| format!("{rows} rows stored"))
                            .unwrap_or_else(|| "store untouched".to_string()),
                        report.pages,
                        report.failed_pages,
                        report.failed_articles,
                        report.stops.iter().map(ToString::to_string).join(", "),
                        if report.cancelled { " (cancelled)" } else { "" }
                    ),
                    Err(e) => println!("{name}: failed: {e}"),
                }
            }
        }
        Command::Watch => {
            let every = args.scrape_interval();
            info!(every_secs = every.as_secs(), "Watching sources");
            scheduler.run_every(every).await;
        }
        Command::List => {
            for summary in scheduler.list_sources().await {
                let updated = summary
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "not yet written".to_string());
                println!("{:<14} {:<48} {updated}", summary.name, summary.title);
            }
        }
        Command::Show { name } => {
            for item in scheduler.read_items(&name).await? {
                println!("{}  {}  {}", item.date, item.title, item.url);
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}
