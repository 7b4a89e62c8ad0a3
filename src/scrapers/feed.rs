//! RSS 2.0 and Atom feeds.
//!
//! The body is tried as RSS first and as Atom second. Feeds are a single
//! page: there is never a next page.

use super::{Adapter, Listing, Page, resolve_link};
use crate::error::ConfigError;
use crate::models::Discovered;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSpec {}

impl FeedSpec {
    pub fn build(&self) -> Result<FeedAdapter, ConfigError> {
        Ok(FeedAdapter)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedAdapter;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    guid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// The `alternate` link, or the first link when none is marked.
    fn href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
            .or_else(|| self.links.first())
            .and_then(|l| l.href.as_deref())
    }
}

fn parse_rss(page: &Page) -> Result<Vec<Discovered>, quick_xml::de::DeError> {
    let rss: Rss = quick_xml::de::from_str(&page.body)?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let href = item.link.as_deref().or(item.guid.as_deref())?;
            let url = resolve_link(&page.url, href)?;
            Discovered::new(item.title.as_deref()?, url, item.pub_date.as_deref())
        })
        .collect())
}

fn parse_atom(page: &Page) -> Result<Vec<Discovered>, quick_xml::de::DeError> {
    let feed: AtomFeed = quick_xml::de::from_str(&page.body)?;
    Ok(feed
        .entries
        .iter()
        .filter_map(|entry| {
            let url = resolve_link(&page.url, entry.href()?)?;
            let title = &entry.title.as_ref()?.value;
            let date = entry.published.as_deref().or(entry.updated.as_deref());
            Discovered::new(title, url, date)
        })
        .collect())
}

impl Adapter for FeedAdapter {
    fn parse_listing(&self, page: &Page) -> Listing {
        let entries = match parse_rss(page) {
            Ok(entries) => entries,
            Err(rss_err) => match parse_atom(page) {
                Ok(entries) => entries,
                Err(atom_err) => {
                    warn!(
                        url = %page.url,
                        rss_error = %rss_err,
                        atom_error = %atom_err,
                        "body is neither RSS nor Atom"
                    );
                    Vec::new()
                }
            },
        };
        debug!(url = %page.url, count = entries.len(), "parsed feed");
        Listing {
            entries,
            next: None,
            indexes: Vec::new(),
        }
    }

    fn is_article(&self, _url: &Url) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{NormalizedDate, normalize};
    use chrono::NaiveDate;

    fn page(body: &str) -> Page {
        Page::new(Url::parse("https://www.example.govt.nz/feeds/news").unwrap(), body)
    }

    #[test]
    fn test_rss_items() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0"><channel>
  <title>News</title>
  <link>https://www.example.govt.nz/news</link>
  <item>
    <title><![CDATA[Monetary Policy Statement &amp; press conference]]></title>
    <link>https://www.example.govt.nz/news/2025/11/mps</link>
    <pubDate>Wed, 26 Nov 2025 01:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Relative link</title>
    <link>/news/2025/11/relative</link>
    <pubDate>Tue, 25 Nov 2025 21:00:00 +1300</pubDate>
  </item>
  <item>
    <title>No link at all</title>
  </item>
</channel></rss>"#;
        let listing = FeedAdapter.parse_listing(&page(body));
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[1].url.as_str(), "https://www.example.govt.nz/news/2025/11/relative");
        assert_eq!(
            normalize(listing.entries[0].raw_date.as_deref().unwrap()),
            NormalizedDate::Known(NaiveDate::from_ymd_opt(2025, 11, 26).unwrap())
        );
        assert!(listing.next.is_none());
    }

    #[test]
    fn test_atom_entries() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>News</title>
  <entry>
    <title type="text">OCR held at 2.25%</title>
    <link rel="alternate" href="https://www.example.govt.nz/news/ocr"/>
    <published>2025-11-26T14:00:00+13:00</published>
    <updated>2025-11-27T09:00:00+13:00</updated>
  </entry>
  <entry>
    <title>Only updated</title>
    <link href="/news/other"/>
    <updated>2025-10-01T09:00:00Z</updated>
  </entry>
</feed>"#;
        let listing = FeedAdapter.parse_listing(&page(body));
        let got: Vec<_> = listing
            .entries
            .iter()
            .map(|e| (e.title.as_str(), e.raw_date.as_deref()))
            .collect();
        assert_eq!(
            got,
            [
                ("OCR held at 2.25%", Some("2025-11-26T14:00:00+13:00")),
                ("Only updated", Some("2025-10-01T09:00:00Z")),
            ]
        );
    }

    #[test]
    fn test_atom_links_split_by_other_elements() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Statement</title>
    <link rel="enclosure" href="https://www.example.govt.nz/files/statement.pdf"/>
    <id>urn:example:1</id>
    <link rel="alternate" href="https://www.example.govt.nz/news/statement"/>
    <updated>2025-11-20T09:00:00Z</updated>
  </entry>
  <entry>
    <title>Speech</title>
    <link rel="alternate" href="https://www.example.govt.nz/news/speech"/>
    <id>urn:example:2</id>
    <published>2025-11-18T09:00:00Z</published>
  </entry>
</feed>"#;
        let listing = FeedAdapter.parse_listing(&page(body));
        let got: Vec<_> = listing
            .entries
            .iter()
            .map(|e| (e.title.as_str(), e.url.path()))
            .collect();
        assert_eq!(
            got,
            [("Statement", "/news/statement"), ("Speech", "/news/speech")]
        );
    }

    #[test]
    fn test_garbage_is_empty_listing() {
        let listing = FeedAdapter.parse_listing(&page("<html><body>Not a feed</body></html>"));
        assert!(listing.entries.is_empty());
    }
}
