//! Listings where each entry is a heading link with a date in nearby text.
//!
//! The page (or the part matched by `scope`) is flattened into a sequence of
//! heading links and text runs in document order. An entry's date is the
//! first date phrase in the text between its heading and the previous
//! heading (`date_side: before`) or the next one (`date_side: after`).
//! Links with denylisted text are not entries and do not separate entries.

use super::{Adapter, Denylist, LinkRule, Listing, Page, anchor, parse_selector};
use crate::dates::find_date_text;
use crate::error::ConfigError;
use crate::models::Discovered;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSide {
    Before,
    #[default]
    After,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadingSpec {
    /// Restrict the scan to the first element matching this selector.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_levels")]
    pub headings: Vec<String>,
    #[serde(default)]
    pub date_side: DateSide,
    #[serde(default)]
    pub link_prefix: Option<String>,
    #[serde(default)]
    pub link_pattern: Option<String>,
    /// Skip links whose URL has a query string (filters, tabs, paging).
    #[serde(default)]
    pub skip_query: bool,
    #[serde(default)]
    pub require_date: bool,
    #[serde(default)]
    pub deny: Vec<String>,
}

fn default_levels() -> Vec<String> {
    ["h2", "h3", "h4"].map(String::from).to_vec()
}

impl HeadingSpec {
    pub fn build(&self) -> Result<HeadingAdapter, ConfigError> {
        Ok(HeadingAdapter {
            scope: self.scope.as_deref().map(parse_selector).transpose()?,
            headings: self.headings.iter().map(|h| h.to_ascii_lowercase()).collect(),
            date_side: self.date_side,
            rule: LinkRule::new(self.link_prefix.as_deref(), self.link_pattern.as_deref())?,
            skip_query: self.skip_query,
            require_date: self.require_date,
            deny: Denylist::new(&self.deny),
        })
    }
}

#[derive(Debug)]
pub struct HeadingAdapter {
    scope: Option<Selector>,
    headings: Vec<String>,
    date_side: DateSide,
    rule: LinkRule,
    skip_query: bool,
    require_date: bool,
    deny: Denylist,
}

enum Token {
    Link { title: String, url: Url },
    Text(String),
}

impl HeadingAdapter {
    fn in_heading(&self, el: ElementRef<'_>) -> bool {
        self.headings.iter().any(|h| h == el.value().name())
    }

    fn root<'a>(&self, doc: &'a Html) -> ElementRef<'a> {
        self.scope
            .as_ref()
            .and_then(|sel| doc.select(sel).next())
            .unwrap_or_else(|| doc.root_element())
    }

    /// Flatten `root` into heading links and the text between them.
    fn tokens(&self, root: ElementRef<'_>, base: &Url) -> Vec<Token> {
        let mut tokens = Vec::new();
        for node in root.descendants() {
            if let Some(el) = ElementRef::wrap(node) {
                if el.value().name() != "a" {
                    continue;
                }
                let under_heading = el
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|a| self.in_heading(a));
                if !under_heading {
                    continue;
                }
                let Some((title, url)) = anchor(base, el) else {
                    continue;
                };
                if title.is_empty() || self.deny.denies(&title) {
                    continue;
                }
                tokens.push(Token::Link { title, url });
            } else if let Some(text) = node.value().as_text() {
                let skip = node.ancestors().filter_map(ElementRef::wrap).any(|a| {
                    self.in_heading(a) || matches!(a.value().name(), "script" | "style" | "noscript")
                });
                if !skip && !text.trim().is_empty() {
                    tokens.push(Token::Text(text.to_string()));
                }
            }
        }
        tokens
    }

    fn accepts(&self, url: &Url) -> bool {
        if self.skip_query && url.query().is_some() {
            return false;
        }
        self.rule.matches(url)
    }
}

impl Adapter for HeadingAdapter {
    fn parse_listing(&self, page: &Page) -> Listing {
        let doc = page.document();
        let tokens = self.tokens(self.root(&doc), &page.url);

        // Text between consecutive links: gaps[i] precedes link i, and the
        // final gap trails the last link.
        let mut links = Vec::new();
        let mut gaps = vec![String::new()];
        for token in tokens {
            match token {
                Token::Link { title, url } => {
                    links.push((title, url));
                    gaps.push(String::new());
                }
                Token::Text(text) => {
                    if let Some(gap) = gaps.last_mut() {
                        gap.push(' ');
                        gap.push_str(&text);
                    }
                }
            }
        }

        let mut entries = Vec::new();
        let mut dropped = 0usize;
        for (i, (title, url)) in links.into_iter().enumerate() {
            if !self.accepts(&url) {
                continue;
            }
            let gap = match self.date_side {
                DateSide::Before => &gaps[i],
                DateSide::After => &gaps[i + 1],
            };
            let raw_date = find_date_text(gap);
            if self.require_date && raw_date.is_none() {
                dropped += 1;
                continue;
            }
            match Discovered::new(&title, url, raw_date.as_deref()) {
                Some(entry) => entries.push(entry),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!(url = %page.url, dropped, "skipped undated heading links");
        }

        Listing {
            entries,
            next: None,
            indexes: Vec::new(),
        }
    }

    fn is_article(&self, url: &Url) -> bool {
        self.accepts(url)
    }
}
