//! Title and publication date lookup on article pages.
//!
//! Sources disagree on where an article states its date, so the lookup walks
//! a fixed priority list and takes the first hit:
//!
//! 1. `<meta>` tags: `dc.date`, `dcterms.created`, `article:published_time`
//! 2. `<time datetime="...">`
//! 3. JSON-LD `datePublished`
//! 4. the text of the first `<time>` element
//! 5. the first date phrase in the body text
//!
//! The title is the first `<h1>`, falling back to `<title>`.

use super::{ArticleMeta, Page, element_text};
use crate::dates::find_date_text;
use crate::utils::collapse_whitespace;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[content]").unwrap());
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time").unwrap());
static JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Meta tag names in priority order, compared case-insensitively against
/// either `name` or `property`.
const META_DATE_NAMES: &[&str] = &["dc.date", "dcterms.created", "article:published_time"];

pub fn extract(page: &Page) -> ArticleMeta {
    let doc = page.document();
    let meta = ArticleMeta {
        title: title(&doc),
        raw_date: date(&doc),
    };
    if meta.raw_date.is_none() {
        debug!(url = %page.url, "no date found on article page");
    }
    meta
}

fn title(doc: &Html) -> Option<String> {
    doc.select(&H1)
        .map(element_text)
        .find(|t| !t.is_empty())
        .or_else(|| doc.select(&TITLE).map(element_text).find(|t| !t.is_empty()))
}

fn date(doc: &Html) -> Option<String> {
    meta_date(doc)
        .or_else(|| time_attribute(doc))
        .or_else(|| json_ld_date(doc))
        .or_else(|| time_text(doc))
        .or_else(|| body_date(doc))
}

fn meta_date(doc: &Html) -> Option<String> {
    let tags: Vec<(String, &str)> = doc
        .select(&META)
        .filter_map(|el| {
            let key = el
                .value()
                .attr("name")
                .or_else(|| el.value().attr("property"))?;
            let content = el.value().attr("content")?;
            Some((key.to_ascii_lowercase(), content))
        })
        .collect();

    META_DATE_NAMES.iter().find_map(|name| {
        tags.iter()
            .find(|(key, content)| key == name && !content.trim().is_empty())
            .map(|(_, content)| collapse_whitespace(content))
    })
}

fn time_attribute(doc: &Html) -> Option<String> {
    doc.select(&TIME)
        .filter_map(|el| el.value().attr("datetime"))
        .map(collapse_whitespace)
        .find(|d| !d.is_empty())
}

fn time_text(doc: &Html) -> Option<String> {
    doc.select(&TIME)
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn json_ld_date(doc: &Html) -> Option<String> {
    doc.select(&JSON_LD).find_map(|el| {
        let raw = el.text().collect::<String>();
        let value: Value = serde_json::from_str(&raw).ok()?;
        find_date_published(&value)
    })
}

fn find_date_published(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("datePublished")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| map.values().find_map(find_date_published)),
        Value::Array(items) => items.iter().find_map(find_date_published),
        _ => None,
    }
}

fn body_date(doc: &Html) -> Option<String> {
    let root = doc.select(&BODY).next().unwrap_or_else(|| doc.root_element());
    find_date_text(&visible_text(root))
}

/// Text of `root` without `<script>`/`<style>` content.
pub(crate) fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| matches!(el.value().name(), "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn page(body: &str) -> Page {
        Page::new(Url::parse("https://www.example.org/a/1").unwrap(), body)
    }

    #[test]
    fn test_meta_tags_win_in_priority_order() {
        let meta = extract(&page(
            r#"<html><head>
                <meta property="article:published_time" content="2025-01-03T09:00:00+13:00">
                <meta name="DC.Date" content="2025-01-02">
                <title>Site | Story</title></head>
               <body><h1> Story </h1><time datetime="2025-01-05">5 January 2025</time></body></html>"#,
        ));
        assert_eq!(meta.title.as_deref(), Some("Story"));
        assert_eq!(meta.raw_date.as_deref(), Some("2025-01-02"));
    }

    #[test]
    fn test_time_datetime_then_json_ld() {
        let meta = extract(&page(
            r#"<html><body><h1>A</h1><time datetime="2024-06-30">30 June</time></body></html>"#,
        ));
        assert_eq!(meta.raw_date.as_deref(), Some("2024-06-30"));

        let meta = extract(&page(
            r#"<html><head><script type="application/ld+json">
                {"@context":"https://schema.org","@graph":[{"@type":"WebPage"},
                 {"@type":"NewsArticle","datePublished":"2024-07-01T10:00:00Z"}]}
               </script></head><body><h1>A</h1></body></html>"#,
        ));
        assert_eq!(meta.raw_date.as_deref(), Some("2024-07-01T10:00:00Z"));
    }

    #[test]
    fn test_time_text_and_body_fallback() {
        let meta = extract(&page(
            "<html><body><h1>A</h1><p>Published <time>Friday 28 November 2025</time></p></body></html>",
        ));
        assert_eq!(meta.raw_date.as_deref(), Some("Friday 28 November 2025"));

        let meta = extract(&page(
            r#"<html><head><title>Only title</title></head><body>
                <script>var d = "1 January 2001";</script>
                <p>Media release, 2 December 2025 2.30 pm</p></body></html>"#,
        ));
        assert_eq!(meta.title.as_deref(), Some("Only title"));
        assert_eq!(meta.raw_date.as_deref(), Some("2 December 2025"));
    }

    #[test]
    fn test_nothing_found() {
        let meta = extract(&page("<html><body><p>no dates here</p></body></html>"));
        assert_eq!(meta, ArticleMeta::default());
    }
}
