//! YAML configuration for the fetcher and the watched sources.
//!
//! A default configuration describing the regulator listings is compiled
//! into the binary (`config/sources.yaml`); `--config` replaces it with a
//! file of the same shape.
//!
//! ```yaml
//! fetcher:
//!   timeout_secs: 30
//!   attempts: 3
//! sources:
//!   - name: rbnz
//!     title: Reserve Bank of New Zealand
//!     seeds: [https://www.rbnz.govt.nz/feeds/news]
//!     max_items: 30
//!     adapter: { kind: feed }
//! ```

use crate::error::ConfigError;
use crate::models::{KeyMode, Limits, PersistPolicy, Source, Strategy};
use crate::scrapers::AdapterSpec;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, instrument};
use url::Url;

const BUILTIN: &str = include_str!("../config/sources.yaml");

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.88 Safari/537.36";

/// Options for the shared [`crate::fetcher::Fetcher`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetcherConfig {
    pub user_agent: String,
    /// Extra request headers sent with every request.
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub attempts: usize,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        let headers = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-NZ,en-AU;q=0.9,en;q=0.8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers,
            timeout_secs: 30,
            attempts: 3,
            pacing_min_ms: 800,
            pacing_max_ms: 1500,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            jitter_max_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraversalKind {
    #[default]
    Paginate,
    Indexed,
}

/// One source as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Display title; defaults to the name.
    #[serde(default)]
    pub title: Option<String>,
    pub seeds: Vec<String>,
    /// CSV file name in the data directory; defaults to `<name>.csv`.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub policy: PersistPolicy,
    #[serde(default)]
    pub traversal: TraversalKind,
    /// Fixed index pages fetched in addition to the seeds (`indexed` only).
    #[serde(default)]
    pub index_pages: Vec<String>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub key: KeyMode,
    #[serde(default)]
    pub resolve_missing_dates: bool,
    pub adapter: AdapterSpec,
}

fn default_concurrency() -> usize {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// The configuration compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(BUILTIN)
    }

    /// Validate every source and compile its adapter.
    pub fn build_sources(&self) -> Result<Vec<Source>, ConfigError> {
        let mut names = HashSet::new();
        let mut sources = Vec::with_capacity(self.sources.len());
        for cfg in &self.sources {
            if !names.insert(cfg.name.as_str()) {
                return Err(ConfigError::DuplicateSource(cfg.name.clone()));
            }
            let source = cfg.build()?;
            debug!(source = %source.name, adapter = cfg.adapter.kind(), "built source");
            sources.push(source);
        }
        debug!(count = sources.len(), "built sources");
        Ok(sources)
    }
}

impl SourceConfig {
    fn parse_urls(&self, urls: &[String]) -> Result<Vec<Url>, ConfigError> {
        urls.iter()
            .map(|u| {
                Url::parse(u).map_err(|reason| ConfigError::Url {
                    source_name: self.name.clone(),
                    url: u.clone(),
                    reason,
                })
            })
            .collect()
    }

    pub fn build(&self) -> Result<Source, ConfigError> {
        let seeds = self.parse_urls(&self.seeds)?;
        if seeds.is_empty() {
            return Err(ConfigError::NoSeeds(self.name.clone()));
        }

        let output = self
            .output
            .clone()
            .unwrap_or_else(|| format!("{}.csv", self.name));
        let plain = Path::new(&output)
            .file_name()
            .is_some_and(|f| f == output.as_str());
        if !plain {
            return Err(ConfigError::Output {
                source_name: self.name.clone(),
                output,
            });
        }

        let strategy = match self.traversal {
            TraversalKind::Paginate => Strategy::Paginate,
            TraversalKind::Indexed => Strategy::Indexed {
                index_pages: self.parse_urls(&self.index_pages)?,
            },
        };

        Ok(Source {
            name: self.name.clone(),
            title: self.title.clone().unwrap_or_else(|| self.name.clone()),
            seeds,
            adapter: self.adapter.build()?,
            strategy,
            limits: Limits {
                max_pages: self.max_pages,
                max_items: self.max_items,
            },
            policy: self.policy,
            key: self.key,
            concurrency: self.concurrency.max(1),
            resolve_missing_dates: self.resolve_missing_dates,
            output,
        })
    }
}
