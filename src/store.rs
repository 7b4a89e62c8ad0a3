//! Per-source CSV result files.
//!
//! Each source owns one file in the data directory with rows
//! `normalized_date,title,url` and no header. The date column is
//! `YYYY-MM-DD` or empty when unknown.
//!
//! # Consistency
//!
//! Every write, replace or append, builds the complete new file in a
//! temporary file in the same directory and renames it over the old one.
//! Readers therefore see either the previous or the new row set, never a
//! mix. Writes to one source are serialized by a per-source lock; reads take
//! no lock.
//!
//! Appending keeps the stored rows and adds only rows whose key (the source's
//! [`KeyMode`]) is not stored yet.

use crate::dates::NormalizedDate;
use crate::error::StoreError;
use crate::models::{Item, KeyMode, PersistPolicy, Source};
use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};
use url::Url;

type Row = [String; 3];

#[derive(Debug)]
struct Slot {
    path: PathBuf,
    title: String,
    policy: PersistPolicy,
    key: KeyMode,
    writer: Mutex<()>,
}

/// Name, title and last write time of one source's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub name: String,
    pub title: String,
    /// `None` until the first successful write.
    pub last_updated: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub struct ResultStore {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>, sources: &[Source]) -> Self {
        let dir = dir.into();
        let mut order = Vec::with_capacity(sources.len());
        let mut slots = HashMap::with_capacity(sources.len());
        for source in sources {
            order.push(source.name.clone());
            slots.insert(
                source.name.clone(),
                Slot {
                    path: dir.join(&source.output),
                    title: source.title.replace(['\n', '\r'], " "),
                    policy: source.policy,
                    key: source.key,
                    writer: Mutex::new(()),
                },
            );
        }
        Self { order, slots }
    }

    fn slot(&self, name: &str) -> Result<&Slot, StoreError> {
        self.slots
            .get(name)
            .ok_or_else(|| StoreError::UnknownSource(name.to_string()))
    }

    /// Write a run's items under the source's policy. Returns the number of
    /// rows the file holds afterwards.
    #[instrument(level = "info", skip_all, fields(source = %name, items = items.len()))]
    pub async fn commit(&self, name: &str, items: &[Item]) -> Result<usize, StoreError> {
        let slot = self.slot(name)?;
        let rows: Vec<Row> = items.iter().map(to_row).collect();
        let path = slot.path.clone();
        let policy = slot.policy;
        let key = slot.key;

        let _guard = slot.writer.lock().await;
        let res =
            tokio::task::spawn_blocking(move || write_atomic(&path, policy, key, rows)).await?;
        match &res {
            Ok(total) => info!(path = %slot.path.display(), %policy, rows = total, "Wrote result file"),
            Err(e) => error!(path = %slot.path.display(), %policy, error = %e, "Writing result file failed"),
        }
        res
    }

    /// Items stored for `name`, in file order. A missing file is an empty list.
    pub async fn read_items(&self, name: &str) -> Result<Vec<Item>, StoreError> {
        let path = self.slot(name)?.path.clone();
        let rows = tokio::task::spawn_blocking(move || read_rows(&path)).await??;
        let items: Vec<Item> = rows.into_iter().filter_map(from_row).collect();
        debug!(source = %name, count = items.len(), "Read stored items");
        Ok(items)
    }

    /// Every configured source in configuration order.
    pub async fn list_sources(&self) -> Vec<SourceSummary> {
        let mut out = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let Some(slot) = self.slots.get(name) else {
                continue;
            };
            let last_updated = tokio::fs::metadata(&slot.path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Local>::from);
            out.push(SourceSummary {
                name: name.clone(),
                title: slot.title.clone(),
                last_updated,
            });
        }
        out
    }
}

fn to_row(item: &Item) -> Row {
    [
        item.date.to_field(),
        item.title.replace(['\n', '\r'], " "),
        item.url.to_string(),
    ]
}

fn from_row(row: Row) -> Option<Item> {
    let [date, title, url] = row;
    let url = Url::parse(url.trim()).ok()?;
    if title.trim().is_empty() {
        return None;
    }
    Some(Item {
        title,
        url,
        raw_date: None,
        date: NormalizedDate::from_field(&date),
    })
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn csv_err(path: &Path) -> impl FnOnce(csv::Error) -> StoreError + '_ {
    move |source| StoreError::Csv {
        path: path.display().to_string(),
        source,
    }
}

/// Rows of `path`; short or malformed rows are skipped.
fn read_rows(path: &Path) -> Result<Vec<Row>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(path)(e)),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable row");
                continue;
            }
        };
        if record.len() < 3 {
            continue;
        }
        rows.push([
            record[0].to_string(),
            record[1].to_string(),
            record[2].to_string(),
        ]);
    }
    Ok(rows)
}

/// Identity of a stored row under `key`; rows with unparsable URLs key on the raw text.
fn row_key(key: KeyMode, row: &Row) -> String {
    match Url::parse(row[2].trim()) {
        Ok(url) => key.key(&row[1], &url),
        Err(_) => format!("{}\u{1f}{}", row[1], row[2]),
    }
}

fn write_atomic(
    path: &Path,
    policy: PersistPolicy,
    key: KeyMode,
    new_rows: Vec<Row>,
) -> Result<usize, StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let rows = match policy {
        PersistPolicy::Replace => new_rows,
        PersistPolicy::Append => {
            let mut rows = read_rows(path)?;
            let mut seen: HashSet<String> = rows.iter().map(|r| row_key(key, r)).collect();
            let before = rows.len();
            rows.extend(new_rows.into_iter().filter(|r| seen.insert(row_key(key, r))));
            debug!(path = %path.display(), added = rows.len() - before, "Appending new rows");
            rows
        }
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        for row in &rows {
            writer.write_record(row).map_err(csv_err(path))?;
        }
        writer.flush().map_err(io_err(path))?;
    }
    tmp.as_file_mut().flush().map_err(io_err(path))?;
    tmp.as_file().sync_all().map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(rows.len())
}
