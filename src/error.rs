//! Error types for fetching, configuration, persistence, and harvest runs.
//!
//! Failures are scoped to the smallest unit that can fail: a [`FetchError`]
//! ends one page or one article, a [`StoreError`] ends one persistence step,
//! and a [`HarvestError`] ends one source's run. Nothing here is fatal for the
//! process. Date and title ambiguity is deliberately absent: an unparseable
//! date becomes [`crate::dates::NormalizedDate::Unknown`], not an error.

use crate::models::Item;
use thiserror::Error;

/// Failure to retrieve one resource.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Every attempt failed; carries the last cause.
    #[error("gave up on {target} after {attempts} attempts: {cause}")]
    Exhausted {
        /// Requested URL
        target: String,
        /// Number of attempts made
        attempts: usize,
        /// Error from the final attempt
        cause: Box<FetchError>,
    },

    /// The run was cancelled before the fetch could complete.
    #[error("fetch of {0} cancelled")]
    Cancelled(String),
}

impl FetchError {
    /// True when the error came from run cancellation rather than the remote side.
    pub fn is_cancelled(&self) -> bool {
        match self {
            FetchError::Cancelled(_) => true,
            FetchError::Exhausted { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("source `{source_name}`: invalid URL `{url}`: {reason}")]
    Url {
        source_name: String,
        url: String,
        reason: url::ParseError,
    },

    #[error("invalid CSS selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid pattern `{pattern}`: {reason}")]
    Pattern {
        pattern: String,
        #[source]
        reason: regex::Error,
    },

    #[error("invalid header `{name}`: {reason}")]
    Header { name: String, reason: String },

    #[error("duplicate source name `{0}`")]
    DuplicateSource(String),

    #[error("source `{0}` has no seed URLs")]
    NoSeeds(String),

    #[error("source `{source_name}`: output `{output}` must be a plain file name")]
    Output { source_name: String, output: String },

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Failure to read or write the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failure of one source's harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("unknown source `{0}`")]
    UnknownSource(String),

    /// Persisting failed; the items collected in memory are handed back so the
    /// caller can retry or write them elsewhere.
    #[error("source `{source_name}`: persisting {} items failed: {cause}", items.len())]
    Store {
        source_name: String,
        items: Vec<Item>,
        #[source]
        cause: StoreError,
    },
}
