//! Archives split into index pages (typically one per year).
//!
//! Every anchor on an index page is classified by URL: links matching the
//! article rule become undated entries (their dates come from the article
//! pages), links matching `index_pattern` become further index pages.

use super::{Adapter, LinkRule, Listing, Page, anchor, compile_pattern};
use crate::error::ConfigError;
use crate::models::Discovered;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSpec {
    #[serde(default)]
    pub article_prefix: Option<String>,
    pub article_pattern: String,
    #[serde(default)]
    pub index_pattern: Option<String>,
}

impl IndexSpec {
    pub fn build(&self) -> Result<IndexAdapter, ConfigError> {
        Ok(IndexAdapter {
            articles: LinkRule::new(self.article_prefix.as_deref(), Some(&self.article_pattern))?,
            index: self.index_pattern.as_deref().map(compile_pattern).transpose()?,
        })
    }
}

#[derive(Debug)]
pub struct IndexAdapter {
    articles: LinkRule,
    index: Option<Regex>,
}

impl Adapter for IndexAdapter {
    fn parse_listing(&self, page: &Page) -> Listing {
        let doc = page.document();
        let mut listing = Listing::default();
        let mut seen_indexes = HashSet::new();

        for (text, url) in doc.select(&ANCHORS).filter_map(|a| anchor(&page.url, a)) {
            if self.articles.matches(&url) {
                // Link text on archive pages can be empty (icon links); the
                // URL stands in until the article page supplies a title.
                let title = if text.is_empty() { url.to_string() } else { text };
                if let Some(entry) = Discovered::new(&title, url, None) {
                    listing.entries.push(entry);
                }
            } else if self.index.as_ref().is_some_and(|re| re.is_match(url.path()))
                && url != page.url
                && seen_indexes.insert(url.clone())
            {
                listing.indexes.push(url);
            }
        }
        listing
    }

    fn is_article(&self, url: &Url) -> bool {
        self.articles.matches(url)
    }

    fn prefers_article_title(&self) -> bool {
        true
    }
}
