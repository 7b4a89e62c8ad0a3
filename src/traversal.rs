//! Walking a source's listing pages.
//!
//! A traversal drives one source's adapter across its listing pages and
//! collects the entries it finds. Pages are fetched strictly one after the
//! other. Each walk from a starting page (a "branch") moves through
//!
//! ```text
//! Start -> Fetching -> Extracting -> Deciding -> Start (next page)
//!                                             \-> Done(reason)
//! ```
//!
//! - **Paginate**: one branch per seed, following the adapter's next-page
//!   link. A next link that points at the current page or at any page already
//!   fetched in this traversal ends the branch as a loop.
//! - **Indexed**: one single-page branch per seed, fixed index page, and
//!   index page discovered on a seed; article links are unioned.
//!
//! A failed page fetch ends only its own branch; entries collected so far are
//! kept.

use crate::error::FetchError;
use crate::fetcher::{Fetch, Fetcher};
use crate::models::{Discovered, KeyMode, Source, Strategy};
use crate::scrapers::{Listing, Page};
use crate::utils::truncate_for_log;
use itertools::Itertools;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Why a branch (or the whole traversal) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The adapter reported no further page.
    Exhausted,
    /// The next page was the current page or had already been fetched.
    LoopDetected(Url),
    PageBudget,
    ItemBudget,
    FetchFailed(Url),
    Cancelled,
}

impl StopReason {
    /// Reasons that end the whole traversal, not just one branch.
    fn is_global(&self) -> bool {
        matches!(
            self,
            StopReason::PageBudget | StopReason::ItemBudget | StopReason::Cancelled
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("no further pages"),
            StopReason::LoopDetected(url) => write!(f, "loop at {url}"),
            StopReason::PageBudget => f.write_str("page budget reached"),
            StopReason::ItemBudget => f.write_str("item budget reached"),
            StopReason::FetchFailed(url) => write!(f, "fetch of {url} failed"),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Values in first-seen order, where a later value with the same key replaces
/// the earlier one in place.
#[derive(Debug)]
pub struct Collector<K, V> {
    order: Vec<K>,
    values: HashMap<K, V>,
}

impl<K, V> Default for Collector<K, V> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }
}

impl<K, V> Collector<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Insert `value`; returns true when it replaced an earlier value.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.values.insert(key.clone(), value).is_some() {
            return true;
        }
        self.order.push(key);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn into_values(mut self) -> Vec<V> {
        self.order
            .iter()
            .filter_map(|k| self.values.remove(k))
            .collect()
    }
}

/// Everything one traversal produced.
#[derive(Debug, Default)]
pub struct Traversal {
    /// Deduplicated entries in discovery order.
    pub entries: Vec<Discovered>,
    /// Listing pages fetched successfully.
    pub pages: usize,
    /// How each branch ended, in order.
    pub stops: Vec<StopReason>,
    pub failed_pages: Vec<Url>,
}

impl Traversal {
    pub fn cancelled(&self) -> bool {
        self.stops.contains(&StopReason::Cancelled)
    }
}

enum Phase {
    Start(Url),
    Fetching(Url),
    Extracting(Page),
    Deciding { current: Url, listing: Listing },
    Done(StopReason),
}

/// State owned by one traversal and dropped with it.
struct Walk<'a, T> {
    fetcher: &'a Fetcher<T>,
    source: &'a Source,
    cancel: &'a CancellationToken,
    visited: HashSet<Url>,
    collected: Collector<String, Discovered>,
    discovered_indexes: Vec<Url>,
    pages: usize,
    failed_pages: Vec<Url>,
}

impl<'a, T> Walk<'a, T>
where
    T: Fetch,
{
    fn page_budget_spent(&self) -> bool {
        self.source
            .limits
            .max_pages
            .is_some_and(|max| self.pages + self.failed_pages.len() >= max)
    }

    fn item_budget_spent(&self) -> bool {
        self.source
            .limits
            .max_items
            .is_some_and(|max| self.collected.len() >= max)
    }

    /// Merge one page's entries. Within a page the first occurrence of a key
    /// wins; across pages the later page's entry replaces the earlier one.
    fn merge(&mut self, entries: Vec<Discovered>) -> usize {
        let key_mode: KeyMode = self.source.key;
        let mut on_page = HashSet::new();
        let mut kept = 0usize;
        for entry in entries {
            if !self.source.adapter.is_article(&entry.url) {
                continue;
            }
            let key = key_mode.key(&entry.title, &entry.url);
            if !on_page.insert(key.clone()) {
                continue;
            }
            if self.collected.insert(key, entry) {
                debug!(source = %self.source.name, "entry seen on an earlier page replaced");
            }
            kept += 1;
        }
        kept
    }

    /// Walk from `start`. With `follow_next` unset the branch is one page.
    async fn branch(&mut self, start: Url, follow_next: bool) -> StopReason {
        let mut phase = Phase::Start(start);
        loop {
            phase = match phase {
                Phase::Start(url) => {
                    if self.cancel.is_cancelled() {
                        Phase::Done(StopReason::Cancelled)
                    } else if self.page_budget_spent() {
                        Phase::Done(StopReason::PageBudget)
                    } else {
                        self.visited.insert(url.clone());
                        Phase::Fetching(url)
                    }
                }
                Phase::Fetching(url) => match self.fetcher.get(&url, self.cancel).await {
                    Ok(body) => {
                        self.pages += 1;
                        Phase::Extracting(Page::new(url, body))
                    }
                    Err(e) => self.fetch_failed(url, e),
                },
                Phase::Extracting(page) => {
                    let listing = self.source.adapter.parse_listing(&page);
                    info!(
                        source = %self.source.name,
                        page = self.pages,
                        url = %page.url,
                        entries = listing.entries.len(),
                        "Parsed listing page"
                    );
                    if listing.entries.is_empty() && listing.indexes.is_empty() {
                        debug!(
                            url = %page.url,
                            preview = %truncate_for_log(&page.body, 200),
                            "Listing page yielded nothing"
                        );
                    }
                    Phase::Deciding {
                        current: page.url,
                        listing,
                    }
                }
                Phase::Deciding { current, listing } => {
                    self.merge(listing.entries);
                    self.discovered_indexes.extend(listing.indexes);
                    if self.item_budget_spent() {
                        Phase::Done(StopReason::ItemBudget)
                    } else if !follow_next {
                        Phase::Done(StopReason::Exhausted)
                    } else {
                        match listing.next {
                            None => Phase::Done(StopReason::Exhausted),
                            Some(next) if next == current || self.visited.contains(&next) => {
                                warn!(
                                    source = %self.source.name,
                                    from = %current,
                                    to = %next,
                                    "Loop detected, stopping"
                                );
                                Phase::Done(StopReason::LoopDetected(next))
                            }
                            Some(next) => Phase::Start(next),
                        }
                    }
                }
                Phase::Done(reason) => return reason,
            };
        }
    }

    fn fetch_failed(&mut self, url: Url, e: FetchError) -> Phase {
        if e.is_cancelled() {
            return Phase::Done(StopReason::Cancelled);
        }
        warn!(
            source = %self.source.name,
            url = %url,
            error = %e,
            "Listing page fetch failed; keeping entries collected so far"
        );
        self.failed_pages.push(url.clone());
        Phase::Done(StopReason::FetchFailed(url))
    }

    fn finish(self, stops: Vec<StopReason>) -> Traversal {
        Traversal {
            entries: self.collected.into_values(),
            pages: self.pages,
            stops,
            failed_pages: self.failed_pages,
        }
    }
}

/// Walk every listing page of `source` and collect its entries.
#[instrument(level = "info", skip_all, fields(source = %source.name))]
pub async fn traverse<T>(
    fetcher: &Fetcher<T>,
    source: &Source,
    cancel: &CancellationToken,
) -> Traversal
where
    T: Fetch,
{
    let mut walk = Walk {
        fetcher,
        source,
        cancel,
        visited: HashSet::new(),
        collected: Collector::default(),
        discovered_indexes: Vec::new(),
        pages: 0,
        failed_pages: Vec::new(),
    };
    let mut stops = Vec::new();

    match &source.strategy {
        Strategy::Paginate => {
            for seed in source.seeds.iter().unique() {
                if walk.visited.contains(seed) {
                    continue;
                }
                let stop = walk.branch(seed.clone(), true).await;
                let global = stop.is_global();
                stops.push(stop);
                if global {
                    break;
                }
            }
        }
        Strategy::Indexed { index_pages } => {
            let seeds: HashSet<&Url> = source.seeds.iter().collect();
            let mut queue: VecDeque<Url> = source
                .seeds
                .iter()
                .chain(index_pages.iter())
                .unique()
                .cloned()
                .collect();

            while let Some(url) = queue.pop_front() {
                if walk.visited.contains(&url) {
                    continue;
                }
                let from_seed = seeds.contains(&url);
                let stop = walk.branch(url, false).await;
                let found = std::mem::take(&mut walk.discovered_indexes);
                if from_seed {
                    for index in found {
                        if !walk.visited.contains(&index) && !queue.contains(&index) {
                            queue.push_back(index);
                        }
                    }
                }
                let global = stop.is_global();
                stops.push(stop);
                if global {
                    break;
                }
            }
        }
    }

    let traversal = walk.finish(stops);
    info!(
        pages = traversal.pages,
        failed_pages = traversal.failed_pages.len(),
        entries = traversal.entries.len(),
        last_stop = %traversal.stops.last().map(ToString::to_string).unwrap_or_default(),
        "Traversal finished"
    );
    traversal
}
