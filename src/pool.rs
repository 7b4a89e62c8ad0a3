//! Bounded-concurrency article fetching.
//!
//! Entries whose listing gave no date are resolved by fetching their article
//! pages. At most `Source::concurrency` fetches are in flight at once; results
//! arrive in completion order and each carries the ordinal it was submitted
//! with so the caller can restore discovery order.

use crate::error::FetchError;
use crate::fetcher::{Fetch, Fetcher};
use crate::models::{Discovered, Source};
use crate::scrapers::{ArticleMeta, Page};
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// An article fetched and parsed.
#[derive(Debug)]
pub struct Resolved {
    pub ordinal: usize,
    pub entry: Discovered,
    pub meta: ArticleMeta,
}

/// An article whose fetch failed; excluded from the harvest.
#[derive(Debug)]
pub struct ArticleFailure {
    pub ordinal: usize,
    pub entry: Discovered,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct PoolOutcome {
    /// Completion order.
    pub resolved: Vec<Resolved>,
    pub failures: Vec<ArticleFailure>,
}

/// Fetch and parse every job's article page, at most `source.concurrency` at
/// a time. One failure never affects sibling work.
#[instrument(level = "info", skip_all, fields(source = %source.name, jobs = jobs.len()))]
pub async fn resolve_articles<T>(
    fetcher: &Fetcher<T>,
    source: &Source,
    jobs: Vec<(usize, Discovered)>,
    cancel: &CancellationToken,
) -> PoolOutcome
where
    T: Fetch,
{
    let t0 = Instant::now();
    let adapter = &source.adapter;
    let limit = source.concurrency.max(1);

    let results: Vec<Result<Resolved, ArticleFailure>> = stream::iter(jobs)
        .map(|(ordinal, entry)| async move {
            match fetcher.get(&entry.url, cancel).await {
                Ok(body) => {
                    let meta = adapter.parse_article(&Page::new(entry.url.clone(), body));
                    debug!(url = %entry.url, date = ?meta.raw_date, "Resolved article");
                    Ok(Resolved {
                        ordinal,
                        entry,
                        meta,
                    })
                }
                Err(error) => Err(ArticleFailure {
                    ordinal,
                    entry,
                    error,
                }),
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    let mut outcome = PoolOutcome::default();
    for result in results {
        match result {
            Ok(resolved) => outcome.resolved.push(resolved),
            Err(failure) => {
                if failure.error.is_cancelled() {
                    debug!(url = %failure.entry.url, "Article fetch cancelled");
                } else {
                    warn!(
                        url = %failure.entry.url,
                        error = %failure.error,
                        "Article fetch failed; excluding it"
                    );
                }
                outcome.failures.push(failure);
            }
        }
    }

    info!(
        resolved = outcome.resolved.len(),
        failed = outcome.failures.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Article pool finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSite, article_html, fetcher, source};
    use std::time::Duration;
    use url::Url;

    fn job(i: usize) -> (usize, Discovered) {
        let url = Url::parse(&format!("https://example.org/a/{i}")).unwrap();
        (i, Discovered::new(&format!("Article {i}"), url, None).unwrap())
    }

    #[tokio::test]
    async fn test_one_failure_never_aborts_the_batch() {
        let mut site = FakeSite::new().delayed(Duration::from_millis(10));
        for i in 0..20 {
            let url = format!("https://example.org/a/{i}");
            site = if i == 7 {
                site.failing(&url)
            } else {
                site.page(&url, article_html(&format!("Article {i}"), "3 March 2025"))
            };
        }
        let fetcher = fetcher(site);
        let mut src = source("s", &["https://example.org/"]);
        src.concurrency = 4;

        let jobs = (0..20).map(job).collect();
        let outcome = resolve_articles(&fetcher, &src, jobs, &CancellationToken::new()).await;

        assert_eq!(outcome.resolved.len(), 19);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].ordinal, 7);
        assert!(outcome.resolved.iter().all(|r| r.meta.raw_date.as_deref() == Some("3 March 2025")));
        assert!(fetcher.inner_ref().peak_in_flight() <= 4);
        assert!(fetcher.inner_ref().peak_in_flight() >= 2);
        assert_eq!(fetcher.inner_ref().total_hits(), 20);
    }

    #[tokio::test]
    async fn test_cancelled_pool_returns_promptly() {
        let mut site = FakeSite::new().delayed(Duration::from_secs(30));
        for i in 0..8 {
            site = site.page(&format!("https://example.org/a/{i}"), article_html("x", "1 May 2024"));
        }
        let fetcher = fetcher(site);
        let src = source("s", &["https://example.org/"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = resolve_articles(&fetcher, &src, (0..8).map(job).collect(), &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(outcome.resolved.is_empty());
        assert_eq!(outcome.failures.len(), 8);
        assert!(outcome.failures.iter().all(|f| f.error.is_cancelled()));
    }
}
