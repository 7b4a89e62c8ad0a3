//! Triggering harvests and serving stored results.
//!
//! The [`Scheduler`] owns the shared fetcher, the built sources and the
//! result store. Sources run in parallel, one task each; two runs of the
//! same source never overlap (the second waits for the first). A run-level
//! timeout cancels the run's token, which stops fetches and retries; whatever
//! was collected by then is still persisted.

use crate::error::{HarvestError, StoreError};
use crate::fetcher::{Fetch, Fetcher};
use crate::harvest::{HarvestReport, harvest};
use crate::models::{Item, Source};
use crate::store::{ResultStore, SourceSummary};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub struct Scheduler<T> {
    fetcher: Arc<Fetcher<T>>,
    store: Arc<ResultStore>,
    sources: Vec<Arc<Source>>,
    locks: HashMap<String, Arc<Mutex<()>>>,
    run_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl<T> Scheduler<T>
where
    T: Fetch + 'static,
{
    pub fn new(
        fetcher: Fetcher<T>,
        sources: Vec<Source>,
        store: ResultStore,
        run_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        let locks = sources
            .iter()
            .map(|s| (s.name.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            fetcher: Arc::new(fetcher),
            store: Arc::new(store),
            sources: sources.into_iter().map(Arc::new).collect(),
            locks,
            run_timeout,
            shutdown,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    fn source(&self, name: &str) -> Option<&Arc<Source>> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Harvest one source now.
    ///
    /// Waits for a run of the same source that is still in progress.
    #[instrument(level = "info", skip(self))]
    pub async fn run_source(&self, name: &str) -> Result<HarvestReport, HarvestError> {
        let source = self
            .source(name)
            .ok_or_else(|| HarvestError::UnknownSource(name.to_string()))?;
        let lock = self
            .locks
            .get(name)
            .ok_or_else(|| HarvestError::UnknownSource(name.to_string()))?;

        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Previous run still in progress; waiting for it");
                lock.lock().await
            }
        };

        let cancel = self.shutdown.child_token();
        let timer = self.run_timeout.map(|limit| {
            let cancel = cancel.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(source = %name, ?limit, "Run timed out; cancelling");
                cancel.cancel();
            })
        });

        let res = harvest(&self.fetcher, source, &self.store, &cancel).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        res
    }

    /// Harvest the named sources in parallel, one task per source.
    ///
    /// Results come back in completion order.
    pub async fn run_many(
        self: &Arc<Self>,
        names: Vec<String>,
    ) -> Vec<(String, Result<HarvestReport, HarvestError>)> {
        let mut set = JoinSet::new();
        for name in names {
            let this = Arc::clone(self);
            set.spawn(async move {
                let res = this.run_source(&name).await;
                (name, res)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, res)) => {
                    match &res {
                        Ok(report) => info!(
                            source = %report.source,
                            items = report.items.len(),
                            cancelled = report.cancelled,
                            "Source run finished"
                        ),
                        Err(e) => error!(source = %name, error = %e, "Source run failed"),
                    }
                    results.push((name, res));
                }
                Err(e) => error!(error = %e, "Source task panicked or was aborted"),
            }
        }
        results
    }

    pub async fn run_all(self: &Arc<Self>) -> Vec<(String, Result<HarvestReport, HarvestError>)> {
        self.run_many(self.source_names()).await
    }

    /// Run every source now and then every `every` until shutdown.
    #[instrument(level = "info", skip(self))]
    pub async fn run_every(self: &Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested; scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let results = self.run_all().await;
                    let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
                    info!(ok, failed = results.len() - ok, "Scheduled round finished");
                }
            }
        }
    }

    pub async fn list_sources(&self) -> Vec<SourceSummary> {
        self.store.list_sources().await
    }

    pub async fn read_items(&self, name: &str) -> Result<Vec<Item>, StoreError> {
        self.store.read_items(name).await
    }
}
