//! Listings whose entries sit in repeated item containers.
//!
//! Each container matched by `item` yields one entry: the first `link`
//! anchor inside it gives title and URL, the first `date` element (its
//! `datetime` attribute if present, else its text) gives the raw date. The
//! next page is found by the `next` selector or, failing that, by an anchor
//! whose text is `next_text`.

use super::{
    Adapter, Denylist, LinkRule, Listing, Page, anchor, element_text, parse_selector, resolve_link,
};
use crate::error::ConfigError;
use crate::models::Discovered;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSpec {
    /// Container of one entry.
    pub item: String,
    /// Anchor inside the container.
    #[serde(default = "default_link")]
    pub link: String,
    /// Date element inside the container.
    #[serde(default)]
    pub date: Option<String>,
    /// Anchor to the next listing page.
    #[serde(default)]
    pub next: Option<String>,
    /// Text of the next-page anchor, compared case-insensitively.
    #[serde(default)]
    pub next_text: Option<String>,
    /// Drop entries that show no date.
    #[serde(default)]
    pub require_date: bool,
    #[serde(default)]
    pub link_prefix: Option<String>,
    #[serde(default)]
    pub link_pattern: Option<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

fn default_link() -> String {
    "a[href]".to_string()
}

impl SelectorSpec {
    pub fn build(&self) -> Result<SelectorAdapter, ConfigError> {
        Ok(SelectorAdapter {
            item: parse_selector(&self.item)?,
            link: parse_selector(&self.link)?,
            date: self.date.as_deref().map(parse_selector).transpose()?,
            next: self.next.as_deref().map(parse_selector).transpose()?,
            next_text: self.next_text.as_ref().map(|t| t.trim().to_lowercase()),
            require_date: self.require_date,
            rule: LinkRule::new(self.link_prefix.as_deref(), self.link_pattern.as_deref())?,
            deny: Denylist::new(&self.deny),
        })
    }
}

#[derive(Debug)]
pub struct SelectorAdapter {
    item: Selector,
    link: Selector,
    date: Option<Selector>,
    next: Option<Selector>,
    next_text: Option<String>,
    require_date: bool,
    rule: LinkRule,
    deny: Denylist,
}

impl SelectorAdapter {
    fn next_page(&self, doc: &Html, page: &Page) -> Option<Url> {
        if let Some(next) = &self.next {
            if let Some(url) = doc
                .select(next)
                .filter_map(|el| el.value().attr("href"))
                .find_map(|href| resolve_link(&page.url, href))
            {
                return Some(url);
            }
        }
        let wanted = self.next_text.as_deref()?;
        doc.select(&ANCHORS)
            .filter(|el| element_text(*el).to_lowercase() == wanted)
            .find_map(|el| resolve_link(&page.url, el.value().attr("href")?))
    }
}

impl Adapter for SelectorAdapter {
    fn parse_listing(&self, page: &Page) -> Listing {
        let doc = page.document();
        let mut entries = Vec::new();
        let mut dropped = 0usize;

        for item in doc.select(&self.item) {
            let Some((title, url)) = item.select(&self.link).find_map(|a| anchor(&page.url, a))
            else {
                dropped += 1;
                continue;
            };
            if self.deny.denies(&title) || !self.rule.matches(&url) {
                dropped += 1;
                continue;
            }
            let raw_date = self.date.as_ref().and_then(|sel| {
                item.select(sel).next().map(|el| {
                    el.value()
                        .attr("datetime")
                        .map(str::to_string)
                        .unwrap_or_else(|| element_text(el))
                })
            });
            if self.require_date && raw_date.as_deref().is_none_or(|d| d.trim().is_empty()) {
                dropped += 1;
                continue;
            }
            match Discovered::new(&title, url, raw_date.as_deref()) {
                Some(entry) => entries.push(entry),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!(url = %page.url, dropped, "skipped incomplete entries");
        }

        Listing {
            entries,
            next: self.next_page(&doc, page),
            indexes: Vec::new(),
        }
    }

    fn is_article(&self, url: &Url) -> bool {
        self.rule.matches(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r##"
<html><body><ul>
  <li class="result"><h3><a href="/news/a">Alpha</a></h3><span class="date">28 November 2025</span></li>
  <li class="result"><h3><a href="/news/b">Bravo</a></h3><span class="date">27 November 2025</span></li>
  <li class="result"><h3>No link here</h3><span class="date">26 November 2025</span></li>
  <li class="result"><h3><a href="/news/c">Charlie</a></h3><time datetime="2025-11-25">Tuesday</time></li>
  <li class="result"><h3><a href="/news/d">  </a></h3><span class="date">24 November 2025</span></li>
  <li class="result"><h3><a href="/news/e">Echo</a></h3></li>
  <li class="result"><h3><a href="#">Jump</a></h3><span class="date">23 November 2025</span></li>
  <li class="result"><h3><a href="/news/f">Foxtrot</a></h3><span class="date">22 November 2025</span></li>
</ul>
<a class="next page-link" href="?page=2">Next</a>
</body></html>"##;

    fn spec() -> SelectorSpec {
        SelectorSpec {
            item: "li.result".to_string(),
            link: "h3 a[href]".to_string(),
            date: Some("span.date, time".to_string()),
            next: Some("a.next.page-link".to_string()),
            next_text: None,
            require_date: false,
            link_prefix: None,
            link_pattern: None,
            deny: Vec::new(),
        }
    }

    fn page(body: &str) -> Page {
        Page::new(Url::parse("https://www.example.org/news/all/").unwrap(), body)
    }

    #[test]
    fn test_entries_missing_links_are_dropped() {
        let listing = spec().build().unwrap().parse_listing(&page(LISTING));
        let titles: Vec<_> = listing.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["Alpha", "Bravo", "Charlie", "Echo", "Foxtrot"]);
        assert_eq!(listing.entries[2].raw_date.as_deref(), Some("2025-11-25"));
        assert_eq!(listing.entries[3].raw_date, None);
        assert_eq!(
            listing.next.unwrap().as_str(),
            "https://www.example.org/news/all/?page=2"
        );
    }

    #[test]
    fn test_require_date() {
        let adapter = SelectorSpec {
            require_date: true,
            ..spec()
        }
        .build()
        .unwrap();
        let listing = adapter.parse_listing(&page(LISTING));
        assert_eq!(listing.entries.len(), 4);
        assert!(listing.entries.iter().all(|e| e.raw_date.is_some()));
    }

    #[test]
    fn test_next_by_text_and_last_page() {
        let adapter = SelectorSpec {
            next: None,
            next_text: Some("Next".to_string()),
            ..spec()
        }
        .build()
        .unwrap();
        let listing = adapter.parse_listing(&page(LISTING));
        assert!(listing.next.is_some());

        let last = adapter.parse_listing(&page("<ul><li class='result'><h3><a href='/x'>X</a></h3></li></ul>"));
        assert_eq!(last.entries.len(), 1);
        assert!(last.next.is_none());
    }

    #[test]
    fn test_link_prefix_filters_and_defines_articles() {
        let adapter = SelectorSpec {
            link_prefix: Some("/news/".to_string()),
            ..spec()
        }
        .build()
        .unwrap();
        assert!(adapter.is_article(&Url::parse("https://www.example.org/news/a").unwrap()));
        assert!(!adapter.is_article(&Url::parse("https://www.example.org/about").unwrap()));
    }
}
