//! Fake sites and listing fixtures shared by the async tests.

use crate::error::FetchError;
use crate::fetcher::{Fetch, Fetcher, RetryPolicy};
use crate::models::{KeyMode, Limits, PersistPolicy, Source, Strategy};
use crate::scrapers::AdapterSpec;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// A map of URL to body. Unknown URLs answer 404, `failing` URLs 503.
#[derive(Debug, Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    hits: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits
            .lock()
            .map(|h| h.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Most requests ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().map(|h| h.values().sum()).unwrap_or(0)
    }

    fn record(&self, url: &str) {
        if let Ok(mut h) = self.hits.lock() {
            *h.entry(url.to_string()).or_insert(0) += 1;
        }
    }

    fn respond(&self, url: &str) -> Result<String, FetchError> {
        if self.failing.contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

impl Fetch for FakeSite {
    async fn fetch(&self, target: &Url) -> Result<String, FetchError> {
        self.record(target.as_str());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.respond(target.as_str())
    }
}

/// A fetcher over `site` with no pacing and a single attempt.
pub fn fetcher(site: FakeSite) -> Fetcher<FakeSite> {
    Fetcher::new(site, RetryPolicy::immediate(1))
}

/// One listing entry: title, href, optional date text.
pub type Row<'a> = (&'a str, &'a str, Option<&'a str>);

/// A listing page in the shape [`listing_adapter`] understands.
pub fn listing_html(rows: &[Row<'_>], next: Option<&str>) -> String {
    let mut html = String::from("<html><body><ul>\n");
    for (title, href, date) in rows {
        html.push_str(&format!("<li class=\"entry\"><a href=\"{href}\">{title}</a>"));
        if let Some(date) = date {
            html.push_str(&format!("<span class=\"date\">{date}</span>"));
        }
        html.push_str("</li>\n");
    }
    html.push_str("</ul>\n");
    if let Some(next) = next {
        html.push_str(&format!("<a class=\"next\" href=\"{next}\">Next</a>\n"));
    }
    html.push_str("</body></html>");
    html
}

/// An article page stating `date` in a `<time>` element.
pub fn article_html(title: &str, date: &str) -> String {
    format!("<html><body><h1>{title}</h1><p><time>{date}</time></p><p>Body.</p></body></html>")
}

pub fn listing_adapter() -> AdapterSpec {
    serde_yaml::from_str(
        "kind: selector\nitem: li.entry\nlink: a[href]\ndate: span.date\nnext: a.next\n",
    )
    .unwrap()
}

/// A paginating source over `seeds` with the selector fixture adapter.
pub fn source(name: &str, seeds: &[&str]) -> Source {
    Source {
        name: name.to_string(),
        title: format!("{name} title"),
        seeds: seeds.iter().map(|s| Url::parse(s).unwrap()).collect(),
        adapter: listing_adapter().build().unwrap(),
        strategy: Strategy::Paginate,
        limits: Limits::default(),
        policy: PersistPolicy::Replace,
        key: KeyMode::Url,
        concurrency: 4,
        resolve_missing_dates: false,
        output: format!("{name}.csv"),
    }
}
