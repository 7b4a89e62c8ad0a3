//! One complete run of one source.
//!
//! traverse -> resolve undated articles -> normalize -> dedupe -> sort ->
//! truncate -> persist.
//!
//! Items are ordered newest first; unknown dates go last and ties keep
//! discovery order. A failed article fetch drops that article only. A run
//! that fetched no listing page at all leaves the stored result untouched.

use crate::dates::NormalizedDate;
use crate::error::HarvestError;
use crate::fetcher::{Fetch, Fetcher};
use crate::models::{Discovered, Item, Source};
use crate::pool::resolve_articles;
use crate::store::ResultStore;
use crate::traversal::{Collector, StopReason, traverse};
use crate::utils::collapse_whitespace;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of a harvest whose persistence step did not fail.
#[derive(Debug)]
pub struct HarvestReport {
    pub source: String,
    /// The run's items in stored order.
    pub items: Vec<Item>,
    /// Rows in the result file after the write; `None` when nothing was written.
    pub stored_rows: Option<usize>,
    pub pages: usize,
    pub failed_pages: usize,
    pub failed_articles: usize,
    pub stops: Vec<StopReason>,
    pub cancelled: bool,
}

/// Turn traversal entries into final, ordered items.
///
/// Returns the items and the number of articles whose fetch failed.
pub async fn collect_items<T>(
    fetcher: &Fetcher<T>,
    source: &Source,
    entries: Vec<Discovered>,
    cancel: &CancellationToken,
) -> (Vec<Item>, usize)
where
    T: Fetch,
{
    let jobs: Vec<(usize, Discovered)> = if source.resolve_missing_dates {
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.raw_date.is_none())
            .map(|(i, e)| (i, e.clone()))
            .collect()
    } else {
        Vec::new()
    };

    let mut slots: Vec<Option<Discovered>> = entries.into_iter().map(Some).collect();
    let mut failed = 0usize;

    if !jobs.is_empty() {
        let outcome = resolve_articles(fetcher, source, jobs, cancel).await;
        for resolved in outcome.resolved {
            let mut entry = resolved.entry;
            if let Some(raw) = resolved.meta.raw_date {
                let raw = collapse_whitespace(&raw);
                if !raw.is_empty() {
                    entry.raw_date = Some(raw);
                }
            }
            if source.adapter.prefers_article_title() {
                if let Some(title) = resolved.meta.title {
                    let title = collapse_whitespace(&title);
                    if !title.is_empty() {
                        entry.title = title;
                    }
                }
            }
            slots[resolved.ordinal] = Some(entry);
        }
        for failure in outcome.failures {
            // Unresolved because the run was cancelled: keep it, undated.
            if !failure.error.is_cancelled() {
                slots[failure.ordinal] = None;
                failed += 1;
            }
        }
    }

    let mut deduped = Collector::default();
    for item in slots.into_iter().flatten().map(Item::from_discovered) {
        deduped.insert(source.key.key(&item.title, &item.url), item);
    }
    let mut items = deduped.into_values();
    items.sort_by(|a, b| NormalizedDate::newest_first(&a.date, &b.date));
    if let Some(max) = source.limits.max_items {
        items.truncate(max);
    }
    (items, failed)
}

/// Run one source end to end and persist the result.
///
/// A store failure returns [`HarvestError::Store`] carrying the items.
#[instrument(level = "info", skip_all, fields(source = %source.name))]
pub async fn harvest<T>(
    fetcher: &Fetcher<T>,
    source: &Source,
    store: &ResultStore,
    cancel: &CancellationToken,
) -> Result<HarvestReport, HarvestError>
where
    T: Fetch,
{
    let t0 = Instant::now();
    let traversal = traverse(fetcher, source, cancel).await;
    let cancelled = traversal.cancelled() || cancel.is_cancelled();
    let pages = traversal.pages;
    let failed_pages = traversal.failed_pages.len();
    let stops = traversal.stops;

    let (items, failed_articles) = collect_items(fetcher, source, traversal.entries, cancel).await;

    let stored_rows = if pages == 0 {
        warn!(failed_pages, "No listing page fetched; keeping stored results");
        None
    } else {
        match store.commit(&source.name, &items).await {
            Ok(rows) => Some(rows),
            Err(cause) => {
                error!(error = %cause, items = items.len(), "Persisting harvest failed");
                return Err(HarvestError::Store {
                    source_name: source.name.clone(),
                    items,
                    cause,
                });
            }
        }
    };

    let mut unknown = 0usize;
    for item in items.iter().filter(|i| !i.date.is_known()) {
        unknown += 1;
        debug!(url = %item.url, raw = ?item.raw_date, "Publication date unknown");
    }
    info!(
        items = items.len(),
        unknown_dates = unknown,
        pages,
        failed_pages,
        failed_articles,
        cancelled,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Harvest finished"
    );

    Ok(HarvestReport {
        source: source.name.clone(),
        items,
        stored_rows,
        pages,
        failed_pages,
        failed_articles,
        stops,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersistPolicy;
    use crate::testing::{FakeSite, Row, article_html, fetcher, listing_html, source};

    const P1: &str = "https://example.org/news/";
    const P2: &str = "https://example.org/news/?page=2";
    const P3: &str = "https://example.org/news/?page=3";

    fn three_page_site() -> FakeSite {
        let p1: [Row; 7] = [
            ("One", "/n/1", Some("10 November 2025")),
            ("Two", "/n/2", Some("12 November 2025")),
            ("Three", "/n/3", None),
            ("Four", "/n/4", Some("Wednesday 12 November 2025")),
            ("Five", "/n/5", Some("1 October 2025")),
            ("Six", "/n/6", None),
            ("Seven", "/n/7", Some("5 Nov 2025")),
        ];
        let p2: [Row; 7] = [
            ("Eight", "/n/8", Some("12 November 2025")),
            ("Two updated", "/n/2", Some("13 November 2025")),
            ("Nine", "/n/9", None),
            ("Ten", "/n/10", Some("3 November 2025")),
            ("Eleven", "/n/11", Some("20 November 2025")),
            ("Twelve", "/n/12", Some("soon")),
            ("Thirteen", "/n/13", Some("10 November 2025")),
        ];
        let p3: [Row; 6] = [
            ("Fourteen", "/n/14", Some("1 December 2025")),
            ("Five again", "/n/5#top", Some("1 October 2025")),
            ("Fifteen", "/n/15", Some("12 November 2025")),
            ("Sixteen", "/n/16", None),
            ("Seventeen", "/n/17", Some("2 November 2025")),
            ("Eighteen", "/n/18", Some("Published 10 November 2025")),
        ];
        FakeSite::new()
            .page(P1, listing_html(&p1, Some("?page=2")))
            .page(P2, listing_html(&p2, Some("?page=3")))
            .page(P3, listing_html(&p3, None))
    }

    #[tokio::test]
    async fn test_end_to_end_dedupes_and_orders() {
        let tmp = tempfile::tempdir().unwrap();
        let src = source("news", &[P1]);
        let store = ResultStore::new(tmp.path(), std::slice::from_ref(&src));
        let fetcher = fetcher(three_page_site());

        let report = harvest(&fetcher, &src, &store, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.stored_rows, Some(18));

        let stored = store.read_items("news").await.unwrap();
        let paths: Vec<_> = stored.iter().map(|i| i.url.path().to_string()).collect();
        assert_eq!(
            paths,
            [
                "/n/14", "/n/11", "/n/2", "/n/4", "/n/8", "/n/15", "/n/1", "/n/13", "/n/18",
                "/n/7", "/n/10", "/n/17", "/n/5", "/n/3", "/n/6", "/n/9", "/n/12", "/n/16",
            ]
        );
        assert_eq!(stored[2].title, "Two updated");
        assert_eq!(stored[12].title, "Five again");
        assert_eq!(stored[0].date.to_string(), "2025-12-01");
        assert!(stored[13..].iter().all(|i| !i.date.is_known()));
        assert_eq!(report.items.len(), stored.len());
    }

    #[tokio::test]
    async fn test_missing_dates_resolved_from_articles() {
        let site = FakeSite::new()
            .page(
                P1,
                listing_html(
                    &[
                        ("Dated", "/a/1", Some("2 March 2025")),
                        ("Needs date", "/a/2", None),
                        ("Broken", "/a/3", None),
                    ],
                    None,
                ),
            )
            .page("https://example.org/a/2", article_html("Article two", "Friday 28 November 2025"))
            .failing("https://example.org/a/3");
        let fetcher = fetcher(site);
        let mut src = source("s", &[P1]);
        src.resolve_missing_dates = true;

        let entries = traverse(&fetcher, &src, &CancellationToken::new()).await.entries;
        let (items, failed) = collect_items(&fetcher, &src, entries, &CancellationToken::new()).await;

        assert_eq!(failed, 1);
        let got: Vec<_> = items
            .iter()
            .map(|i| (i.title.as_str(), i.date.to_string()))
            .collect();
        assert_eq!(
            got,
            [
                ("Needs date", "2025-11-28".to_string()),
                ("Dated", "2025-03-02".to_string()),
            ]
        );
        assert_eq!(fetcher.inner_ref().hits("https://example.org/a/1"), 0);
    }

    #[tokio::test]
    async fn test_max_items_keeps_newest() {
        let site = FakeSite::new().page(
            P1,
            listing_html(
                &[
                    ("Old", "/a/1", Some("1 January 2020")),
                    ("New", "/a/2", Some("1 January 2025")),
                    ("Undated", "/a/3", None),
                    ("Mid", "/a/4", Some("1 January 2023")),
                ],
                None,
            ),
        );
        let fetcher = fetcher(site);
        let mut src = source("s", &[P1]);
        src.limits.max_items = Some(2);
        let tmp = tempfile::tempdir().unwrap();
        let store = ResultStore::new(tmp.path(), std::slice::from_ref(&src));

        let report = harvest(&fetcher, &src, &store, &CancellationToken::new())
            .await
            .unwrap();
        let titles: Vec<_> = report.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["New", "Mid"]);
    }

    #[tokio::test]
    async fn test_store_failure_returns_items() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let src = source("s", &[P1]);
        // The data directory path is a regular file, so every write fails.
        let store = ResultStore::new(blocker.path(), std::slice::from_ref(&src));
        let fetcher = fetcher(three_page_site());

        let err = harvest(&fetcher, &src, &store, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            HarvestError::Store { source_name, items, .. } => {
                assert_eq!(source_name, "s");
                assert_eq!(items.len(), 18);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_nothing_fetched_keeps_previous_results() {
        let tmp = tempfile::tempdir().unwrap();
        let mut src = source("s", &[P1]);
        src.policy = PersistPolicy::Replace;
        let store = ResultStore::new(tmp.path(), std::slice::from_ref(&src));

        let good = fetcher(three_page_site());
        harvest(&good, &src, &store, &CancellationToken::new()).await.unwrap();

        let down = fetcher(FakeSite::new().failing(P1));
        let report = harvest(&down, &src, &store, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stored_rows, None);
        assert_eq!(report.failed_pages, 1);
        assert_eq!(store.read_items("s").await.unwrap().len(), 18);
    }
}
