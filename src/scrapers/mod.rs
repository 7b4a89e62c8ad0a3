//! Extraction adapters that turn fetched pages into discovered entries.
//!
//! An [`Adapter`] knows how one family of listing pages is laid out. It never
//! fetches anything: the traversal hands it a [`Page`] and gets back a
//! [`Listing`] (entries plus the next page or further index pages), and the
//! harvest pool hands it article pages for [`Adapter::parse_article`].
//!
//! # Variants
//!
//! | Kind | Module | Locates entries by | Used for |
//! |------|--------|--------------------|----------|
//! | `selector` | [`selector`] | CSS selectors per item container | paginated search results |
//! | `heading` | [`heading`] | links inside `h2`-`h4`, date in the text before or after | news index pages |
//! | `feed` | [`feed`] | RSS `<item>` / Atom `<entry>` | news feeds |
//! | `index` | [`index`] | URL patterns for articles and year pages | publication archives |
//!
//! Adapters are built once from an [`AdapterSpec`] at configuration time and
//! shared between workers behind an `Arc`; all of them are stateless.

pub mod article;
pub mod feed;
pub mod heading;
pub mod index;
pub mod selector;

use crate::error::ConfigError;
use crate::models::{Discovered, canonical_url};
use crate::utils::collapse_whitespace;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// A fetched resource body and the URL it came from.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

impl Page {
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self {
            url,
            body: body.into(),
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// What one listing page yielded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Entries in document order.
    pub entries: Vec<Discovered>,
    /// The next page of a paginated listing, if the page links one.
    pub next: Option<Url>,
    /// Further index pages (e.g. one per year) found on this page.
    pub indexes: Vec<Url>,
}

/// Title and date text found on an article page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleMeta {
    pub title: Option<String>,
    pub raw_date: Option<String>,
}

/// Source-specific page recognition.
pub trait Adapter: Send + Sync + fmt::Debug {
    /// Scan one listing page. Entries missing a title or a usable link are
    /// dropped silently.
    fn parse_listing(&self, page: &Page) -> Listing;

    /// Read the title and date off an article page.
    fn parse_article(&self, page: &Page) -> ArticleMeta {
        article::extract(page)
    }

    /// Whether `url` is an article (recorded as an item) rather than a page
    /// that is only crawled through.
    fn is_article(&self, url: &Url) -> bool;

    /// Whether a title read from the article page should replace the
    /// listing's link text.
    fn prefers_article_title(&self) -> bool {
        false
    }
}

/// Adapter configuration, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSpec {
    Selector(selector::SelectorSpec),
    Heading(heading::HeadingSpec),
    Feed(feed::FeedSpec),
    Index(index::IndexSpec),
}

impl AdapterSpec {
    /// Compile selectors and patterns into a shareable adapter.
    pub fn build(&self) -> Result<Arc<dyn Adapter>, ConfigError> {
        Ok(match self {
            AdapterSpec::Selector(spec) => Arc::new(spec.build()?),
            AdapterSpec::Heading(spec) => Arc::new(spec.build()?),
            AdapterSpec::Feed(spec) => Arc::new(spec.build()?),
            AdapterSpec::Index(spec) => Arc::new(spec.build()?),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AdapterSpec::Selector(_) => "selector",
            AdapterSpec::Heading(_) => "heading",
            AdapterSpec::Feed(_) => "feed",
            AdapterSpec::Index(_) => "index",
        }
    }
}

/// Which links count as articles: an optional path prefix and an optional
/// regex over the full URL. Both must match when both are set.
#[derive(Debug, Clone, Default)]
pub struct LinkRule {
    prefix: Option<String>,
    pattern: Option<Regex>,
}

impl LinkRule {
    pub fn new(prefix: Option<&str>, pattern: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            prefix: prefix.map(str::to_string),
            pattern: pattern.map(compile_pattern).transpose()?,
        })
    }

    pub fn matches(&self, url: &Url) -> bool {
        if let Some(prefix) = &self.prefix {
            if !url.path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        match &self.pattern {
            Some(re) => re.is_match(url.as_str()),
            None => true,
        }
    }
}

/// Link texts that mark auxiliary links (audio, transcripts, navigation).
#[derive(Debug, Clone, Default)]
pub struct Denylist(Vec<String>);

impl Denylist {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            texts
                .into_iter()
                .map(|t| collapse_whitespace(t.as_ref()).to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Exact, case-insensitive match on the collapsed link text.
    pub fn denies(&self, text: &str) -> bool {
        let text = collapse_whitespace(text).to_lowercase();
        self.0.iter().any(|d| *d == text)
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|reason| ConfigError::Pattern {
        pattern: pattern.to_string(),
        reason,
    })
}

/// Resolve `href` against `base`, keeping only http(s) links and dropping the
/// fragment. In-page anchors, `mailto:` and `javascript:` links yield `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let url = base.join(href).ok()?;
    match url.scheme() {
        "http" | "https" => Some(canonical_url(url)),
        _ => None,
    }
}

/// Visible text of an element, whitespace-collapsed.
pub fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

/// Resolved `href` and text of an anchor.
pub(crate) fn anchor(base: &Url, el: ElementRef<'_>) -> Option<(String, Url)> {
    let href = el.value().attr("href")?;
    let url = resolve_link(base, href)?;
    Some((element_text(el), url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_resolve_link() {
        let base = url("https://www.example.org/news/all/");
        assert_eq!(
            resolve_link(&base, "../item-1#body").unwrap().as_str(),
            "https://www.example.org/news/item-1"
        );
        assert_eq!(
            resolve_link(&base, "/media/x?page=2").unwrap().as_str(),
            "https://www.example.org/media/x?page=2"
        );
        assert!(resolve_link(&base, "#top").is_none());
        assert!(resolve_link(&base, "   ").is_none());
        assert!(resolve_link(&base, "mailto:press@example.org").is_none());
        assert!(resolve_link(&base, "javascript:void(0)").is_none());
    }

    #[test]
    fn test_link_rule() {
        let rule = LinkRule::new(Some("/speeches/"), Some(r"/\d{4}/sp-.*\.html?$")).unwrap();
        assert!(rule.matches(&url("https://www.example.org/speeches/2025/sp-gov-2025-03-01.html")));
        assert!(!rule.matches(&url("https://www.example.org/speeches/2025/")));
        assert!(!rule.matches(&url("https://www.example.org/media/2025/sp-x.html")));
        assert!(LinkRule::default().matches(&url("https://anything.example/")));
    }

    #[test]
    fn test_link_rule_rejects_bad_pattern() {
        assert!(matches!(
            LinkRule::new(None, Some("(unclosed")),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_denylist_is_exact_and_case_insensitive() {
        let deny = Denylist::new(["Audio", "Q&A Transcript"]);
        assert!(deny.denies("  audio "));
        assert!(deny.denies("q&a\ntranscript"));
        assert!(!deny.denies("Audio of the Governor's speech"));
    }

    #[test]
    fn test_bad_selector_is_config_error() {
        assert!(matches!(
            parse_selector("li[[["),
            Err(ConfigError::Selector { .. })
        ));
    }

    #[test]
    fn test_adapter_spec_from_yaml() {
        let yaml = r#"
kind: feed
"#;
        let spec: AdapterSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind(), "feed");
        assert!(spec.build().is_ok());

        let yaml = r#"
kind: heading
link_prefix: /news/
date_side: after
deny: [audio]
"#;
        let spec: AdapterSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.kind(), "heading");
        assert!(spec.build().is_ok());
    }
}
