//! Data models for discovered items, sources, and their run-time policies.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Discovered`]: An entry found by an adapter, date still raw
//! - [`Item`]: A discovered entry with its normalized date
//! - [`Source`]: One configured listing, its adapter and its policies
//! - Policy types: [`KeyMode`], [`PersistPolicy`], [`Strategy`], [`Limits`]

use crate::dates::{NormalizedDate, normalize};
use crate::scrapers::Adapter;
use crate::utils::collapse_whitespace;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// An entry found on a listing page or feed, before date normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Link text or feed title, whitespace-collapsed and never empty.
    pub title: String,
    /// Absolute article URL without fragment.
    pub url: Url,
    /// Date text as found, if the source put one near the entry.
    pub raw_date: Option<String>,
}

impl Discovered {
    /// Build an entry, or `None` when the title is blank.
    ///
    /// Whitespace in the title and date is collapsed (which also removes
    /// embedded newlines) and the URL fragment is dropped.
    pub fn new(title: &str, url: Url, raw_date: Option<&str>) -> Option<Self> {
        let title = collapse_whitespace(title);
        if title.is_empty() {
            return None;
        }
        let raw_date = raw_date
            .map(collapse_whitespace)
            .filter(|d| !d.is_empty());
        Some(Self {
            title,
            url: canonical_url(url),
            raw_date,
        })
    }
}

/// A harvested item with its normalized publication date.
///
/// Immutable once produced; a later occurrence with the same key replaces it
/// wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub url: Url,
    /// Date text as found; absent for items read back from the store.
    pub raw_date: Option<String>,
    pub date: NormalizedDate,
}

impl Item {
    pub fn from_discovered(entry: Discovered) -> Self {
        let date = entry
            .raw_date
            .as_deref()
            .map(normalize)
            .unwrap_or(NormalizedDate::Unknown);
        Self {
            title: entry.title,
            url: entry.url,
            raw_date: entry.raw_date,
            date,
        }
    }
}

/// Drop the fragment so `page#top` and `page` are the same resource.
pub fn canonical_url(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// Which fields identify an item within one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// The URL alone is unique per source.
    #[default]
    Url,
    /// Several titles share a URL (e.g. anchors on one page), so key on both.
    TitleUrl,
}

impl KeyMode {
    pub fn key(&self, title: &str, url: &Url) -> String {
        match self {
            KeyMode::Url => url.as_str().to_string(),
            KeyMode::TitleUrl => format!("{}\u{1f}{}", title, url),
        }
    }
}

/// How a run's items reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Each run's item set overwrites the stored set.
    #[default]
    Replace,
    /// Each run's items are added after the stored rows.
    Append,
}

impl fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistPolicy::Replace => f.write_str("replace"),
            PersistPolicy::Append => f.write_str("append"),
        }
    }
}

/// How the traversal walks a source's listing pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Follow each seed's "next page" links one page at a time.
    Paginate,
    /// Fetch the seeds plus fixed and discovered index pages, and union their
    /// article links.
    Indexed { index_pages: Vec<Url> },
}

/// Budgets that end a traversal early.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_pages: Option<usize>,
    pub max_items: Option<usize>,
}

/// One configured source. Fixed at configuration time.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub title: String,
    pub seeds: Vec<Url>,
    pub adapter: Arc<dyn Adapter>,
    pub strategy: Strategy,
    pub limits: Limits,
    pub policy: PersistPolicy,
    pub key: KeyMode,
    /// Upper bound on simultaneous article fetches.
    pub concurrency: usize,
    /// Visit article pages for entries whose listing shows no date.
    pub resolve_missing_dates: bool,
    /// File name of this source's slot in the result store.
    pub output: String,
}
