//! Bucketed file store: the primary, durable copy of the corpus.
//!
//! Layout: `root/{date_range}/{category}/[batch_NNN/]{id}.json`. The base
//! category directory is batch 0; once it holds `cap` files the overflow goes
//! to `batch_001`, then `batch_002`, and so on. No directory ever holds more
//! than `cap` documents and batch indices are never skipped.
//!
//! Fill counts are tracked in memory per bucket behind a per-bucket async
//! lock, seeded once from disk when the store is opened.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::dedup::{DedupKeys, DedupRecord};
use crate::error::StoreError;
use crate::models::{normalize_category, AdmittedDocument};

pub const DEFAULT_CAP: usize = 999;
const FALLBACK_CATEGORY: &str = "miscellaneous";
const BATCH_PREFIX: &str = "batch_";
const TMP_SUFFIX: &str = ".json.tmp";

// ── Date ranges ───────────────────────────────────────────────────────────────

/// One inclusive span of filing years. `None` leaves that end open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub label: String,
    #[serde(default)]
    pub start: Option<i32>,
    #[serde(default)]
    pub end: Option<i32>,
}

impl DateRange {
    pub fn new(label: &str, start: Option<i32>, end: Option<i32>) -> Self {
        Self { label: label.to_string(), start, end }
    }

    fn contains(&self, year: i32) -> bool {
        self.start.map_or(true, |s| year >= s) && self.end.map_or(true, |e| year <= e)
    }
}

/// Ordered, contiguous, non-overlapping year ranges covering every year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRanges(Vec<DateRange>);

impl DateRanges {
    pub fn new(ranges: Vec<DateRange>) -> Result<Self, StoreError> {
        let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
            return Err(StoreError::Config("at least one date range is required".into()));
        };
        if first.start.is_some() {
            return Err(StoreError::Config(format!("first date range `{}` must have an open start", first.label)));
        }
        if last.end.is_some() {
            return Err(StoreError::Config(format!("last date range `{}` must have an open end", last.label)));
        }

        let mut seen = std::collections::HashSet::new();
        for range in &ranges {
            if !is_safe_label(&range.label) {
                return Err(StoreError::Config(format!("date range label `{}` is not a safe directory name", range.label)));
            }
            if !seen.insert(range.label.as_str()) {
                return Err(StoreError::Config(format!("duplicate date range label `{}`", range.label)));
            }
            if let (Some(s), Some(e)) = (range.start, range.end) {
                if s > e {
                    return Err(StoreError::Config(format!("date range `{}` ends before it starts", range.label)));
                }
            }
        }

        for pair in ranges.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            match (prev.end, next.start) {
                (Some(e), Some(s)) if s == e + 1 => {}
                _ => {
                    return Err(StoreError::Config(format!(
                        "date ranges `{}` and `{}` are not contiguous",
                        prev.label, next.label
                    )))
                }
            }
        }

        Ok(Self(ranges))
    }

    pub fn bucket_for(&self, year: i32) -> &str {
        self.0
            .iter()
            .find(|r| r.contains(year))
            .or_else(|| self.0.last())
            .map_or("", |r| r.label.as_str())
    }

    pub fn ranges(&self) -> &[DateRange] {
        &self.0
    }
}

impl Default for DateRanges {
    fn default() -> Self {
        Self(vec![
            DateRange::new("2015-2018", None, Some(2018)),
            DateRange::new("2019-2020", Some(2019), Some(2020)),
            DateRange::new("2021-2022", Some(2021), Some(2022)),
            DateRange::new("2023-2024", Some(2023), Some(2024)),
            DateRange::new("2025-future", Some(2025), None),
        ])
    }
}

fn is_safe_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('.')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

// ── Buckets ───────────────────────────────────────────────────────────────────

/// `(date_range, category)`; the batch index is chosen at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BucketKey {
    pub date_range: String,
    pub category: String,
}

impl BucketKey {
    pub fn new(date_range: impl Into<String>, category: impl Into<String>) -> Self {
        Self { date_range: date_range.into(), category: category.into() }
    }

    /// Relative directory of a batch: the base for 0, `batch_NNN` below it otherwise.
    pub fn batch_dir(&self, batch: usize) -> String {
        if batch == 0 {
            format!("{}/{}", self.date_range, self.category)
        } else {
            format!("{}/{}/{}{:03}", self.date_range, self.category, BATCH_PREFIX, batch)
        }
    }
}

fn parse_batch_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(BATCH_PREFIX)?;
    if digits.len() < 3 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|n| *n > 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredPath {
    pub path: PathBuf,
    /// Batch directory relative to the store root.
    pub bucket_path: String,
    pub batch: usize,
}

/// Files found in one batch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryStatus {
    /// Relative to the store root.
    pub path: String,
    pub date_range: String,
    pub category: String,
    pub batch: usize,
    pub files: usize,
}

/// Result of [`BucketedStore::status`], built from a fresh walk of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreReport {
    pub root: PathBuf,
    pub cap: usize,
    /// Document files on disk.
    pub total_files: usize,
    /// Files the in-memory counts account for.
    pub tracked_files: usize,
    pub directories: Vec<DirectoryStatus>,
    /// Directories holding more than `cap` documents.
    pub violations: Vec<DirectoryStatus>,
    /// Missing `batch_NNN` directories below the highest batch of a bucket.
    pub gaps: Vec<String>,
    pub by_date_range: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Overflow directories (`batch_001` and up).
    pub batch_directories: usize,
    pub max_batch: usize,
    /// Files outside the bucket layout, leftover temp files included.
    pub stray_files: usize,
    pub valid: bool,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub cap: usize,
    pub date_ranges: DateRanges,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Default::default() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/corpus"),
            cap: DEFAULT_CAP,
            date_ranges: DateRanges::default(),
        }
    }
}

#[derive(Debug, Default)]
struct BucketState {
    /// File count per batch index.
    counts: Vec<usize>,
}

pub struct BucketedStore {
    config: StoreConfig,
    buckets: Mutex<HashMap<BucketKey, Arc<tokio::sync::Mutex<BucketState>>>>,
    /// Writes left to fail before the filesystem is touched.
    #[cfg(test)]
    failing_writes: std::sync::atomic::AtomicUsize,
}

impl BucketedStore {
    /// Open (creating if needed) the store and count what is already on disk.
    ///
    /// Leftover `*.json.tmp` files from interrupted writes are removed.
    #[instrument(skip(config), fields(root = %config.root.display()))]
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if config.cap == 0 {
            return Err(StoreError::Config("cap must be at least 1".into()));
        }
        tokio::fs::create_dir_all(&config.root).await?;

        let root = config.root.clone();
        let counts = tokio::task::spawn_blocking(move || scan_counts(&root))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let files: usize = counts.values().flatten().sum();
        for (key, c) in &counts {
            if let Some((batch, n)) = c.iter().enumerate().find(|(_, n)| **n > config.cap) {
                warn!(bucket = %key.batch_dir(batch), files = n, cap = config.cap, "Existing directory exceeds cap");
            }
        }
        info!(buckets = counts.len(), files, "Bucketed store opened");

        let buckets = counts
            .into_iter()
            .map(|(k, counts)| (k, Arc::new(tokio::sync::Mutex::new(BucketState { counts }))))
            .collect();

        Ok(Self {
            config,
            buckets: Mutex::new(buckets),
            #[cfg(test)]
            failing_writes: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn cap(&self) -> usize {
        self.config.cap
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Pure routing from filing year and category to a bucket.
    pub fn route(&self, date_filed: NaiveDate, category: &str) -> BucketKey {
        let mut slug = normalize_category(category);
        if slug.is_empty() {
            slug = FALLBACK_CATEGORY.to_string();
        }
        BucketKey::new(self.config.date_ranges.bucket_for(date_filed.year()), slug)
    }

    pub fn route_key(&self, doc: &AdmittedDocument) -> BucketKey {
        self.route(doc.date_filed, &doc.category)
    }

    fn bucket(&self, key: &BucketKey) -> Arc<tokio::sync::Mutex<BucketState>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(buckets.entry(key.clone()).or_default())
    }

    /// Write `doc` into the lowest batch of its bucket that has room.
    ///
    /// Sets `doc.bucket_path` to the chosen batch directory. One failed write
    /// is retried; a second failure leaves the bucket's count untouched.
    #[instrument(skip(self, doc), fields(id = %doc.id))]
    pub async fn commit(&self, doc: &mut AdmittedDocument) -> Result<StoredPath, StoreError> {
        let key = self.route_key(doc);
        let bucket = self.bucket(&key);
        let mut state = bucket.lock().await;

        let cap = self.config.cap;
        let batch = state.counts.iter().position(|&n| n < cap).unwrap_or(state.counts.len());
        let opened_batch = batch == state.counts.len();
        if opened_batch {
            state.counts.push(0);
        }

        let bucket_path = key.batch_dir(batch);
        let dir = self.config.root.join(&bucket_path);
        let path = dir.join(format!("{}.json", doc.id));

        doc.bucket_path = bucket_path.clone();
        let body = match serde_json::to_vec_pretty(&*doc) {
            Ok(body) => body,
            Err(e) => {
                doc.bucket_path.clear();
                if opened_batch {
                    state.counts.pop();
                }
                return Err(e.into());
            }
        };

        if let Err(first) = self.write(&dir, &path, &body).await {
            warn!(path = %path.display(), error = %first, "Write failed, retrying once");
            if let Err(second) = self.write(&dir, &path, &body).await {
                doc.bucket_path.clear();
                if opened_batch {
                    state.counts.pop();
                }
                return Err(StoreError::Persistence { id: doc.id.clone(), path, source: second });
            }
        }

        state.counts[batch] += 1;
        if opened_batch && batch > 0 {
            info!(bucket = %bucket_path, "Opened overflow batch");
        }
        debug!(bucket = %bucket_path, count = state.counts[batch], "Committed");

        Ok(StoredPath { path, bucket_path, batch })
    }

    async fn write(&self, dir: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let inject = self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if inject {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"));
            }
        }
        write_atomic(dir, path, body).await
    }

    /// Keys of every stored document, one file at a time.
    ///
    /// Only files inside the bucket layout are documents, the same set the
    /// fill counts are built from. Each call starts a fresh traversal.
    /// Unreadable files surface as `Err` items; the iteration continues past them.
    pub fn list_all(&self) -> impl Iterator<Item = Result<DedupRecord, StoreError>> + Send + 'static {
        let root = self.config.root.clone();
        WalkDir::new(&self.config.root)
            .min_depth(3)
            .max_depth(4)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(e) if e.file_type().is_file() && document_slot(&root, e.path()).is_some() => {
                    Some(read_keys(e.path()))
                }
                Ok(_) => None,
                Err(e) => Some(Err(StoreError::Io(e.into()))),
            })
    }

    /// Verify the tree on disk: per-directory counts, cap violations, files
    /// outside the layout and drift from the tracked counts.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<StoreReport, StoreError> {
        let root = self.config.root.clone();
        let cap = self.config.cap;
        let mut report = tokio::task::spawn_blocking(move || survey(&root, cap))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        report.tracked_files = self.file_count().await;
        report.valid = report.violations.is_empty()
            && report.gaps.is_empty()
            && report.stray_files == 0
            && report.tracked_files == report.total_files;

        for v in &report.violations {
            warn!(directory = %v.path, files = v.files, cap, "Directory exceeds cap");
        }
        info!(
            files = report.total_files,
            directories = report.directories.len(),
            violations = report.violations.len(),
            stray = report.stray_files,
            valid = report.valid,
            "Store verified"
        );
        Ok(report)
    }

    pub async fn load(&self, path: &Path) -> Result<AdmittedDocument, StoreError> {
        let raw = tokio::fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Tracked file count per batch for one bucket.
    pub async fn batch_counts(&self, key: &BucketKey) -> Vec<usize> {
        let bucket = {
            let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            buckets.get(key).cloned()
        };
        match bucket {
            Some(b) => b.lock().await.counts.clone(),
            None => Vec::new(),
        }
    }

    /// Tracked counts for every bucket, sorted by key.
    pub async fn bucket_layout(&self) -> Vec<(BucketKey, Vec<usize>)> {
        let buckets: Vec<_> = {
            let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
            buckets.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };
        let mut layout = Vec::with_capacity(buckets.len());
        for (key, bucket) in buckets {
            layout.push((key, bucket.lock().await.counts.clone()));
        }
        layout.sort_by(|a, b| a.0.cmp(&b.0));
        layout
    }

    pub async fn file_count(&self) -> usize {
        self.bucket_layout().await.iter().map(|(_, c)| c.iter().sum::<usize>()).sum()
    }
}

async fn write_atomic(dir: &Path, path: &Path, body: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = path.with_extension("json.tmp");
    if let Err(e) = tokio::fs::write(&tmp, body).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn is_document_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
}

/// Bucket and batch of a document file, or `None` when `path` is not a
/// `*.json` file at `{range}/{category}/[batch_NNN/]` under `root`.
fn document_slot(root: &Path, path: &Path) -> Option<(BucketKey, usize)> {
    if !is_document_file(path) {
        return None;
    }
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel.iter().map(|p| p.to_str()).collect::<Option<_>>()?;
    match parts.as_slice() {
        [range, category, _file] => Some((BucketKey::new(*range, *category), 0)),
        [range, category, batch_dir, _file] => {
            Some((BucketKey::new(*range, *category), parse_batch_index(batch_dir)?))
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct StoredKeys {
    id: String,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default)]
    citation: Option<String>,
}

#[derive(Deserialize)]
struct StoredContent {
    content: String,
}

/// Parse only the key fields of a stored document.
fn read_keys(path: &Path) -> Result<DedupRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { path: path.to_path_buf(), reason };

    let raw = std::fs::read(path)?;
    let stored: StoredKeys = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
    let content_hash = match stored.content_hash.filter(|h| !h.is_empty()) {
        Some(hash) => hash,
        None => {
            let body: StoredContent =
                serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
            crate::dedup::content_hash(&body.content)
        }
    };

    Ok(DedupRecord {
        keys: DedupKeys { id: stored.id, content_hash, citation: stored.citation },
        path: Some(path.to_path_buf()),
    })
}

/// Count `*.json` files per bucket and batch, removing stale temp files.
fn scan_counts(root: &Path) -> Result<HashMap<BucketKey, Vec<usize>>, StoreError> {
    let mut counts: HashMap<BucketKey, Vec<usize>> = HashMap::new();

    for entry in WalkDir::new(root).min_depth(3).max_depth(4) {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if name.ends_with(TMP_SUFFIX) {
            debug!(path = %path.display(), "Removing interrupted write");
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Could not remove temp file");
            }
            continue;
        }
        let Some((key, batch)) = document_slot(root, path) else { continue };

        let slot = counts.entry(key).or_default();
        if slot.len() <= batch {
            slot.resize(batch + 1, 0);
        }
        slot[batch] += 1;
    }

    Ok(counts)
}

fn survey(root: &Path, cap: usize) -> Result<StoreReport, StoreError> {
    let mut report = StoreReport { root: root.to_path_buf(), cap, ..Default::default() };
    let mut slots: BTreeMap<(BucketKey, usize), usize> = BTreeMap::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        match document_slot(root, entry.path()) {
            Some(slot) => *slots.entry(slot).or_default() += 1,
            None => {
                debug!(path = %entry.path().display(), "File outside bucket layout");
                report.stray_files += 1;
            }
        }
    }

    let mut highest: BTreeMap<&BucketKey, Vec<usize>> = BTreeMap::new();
    for ((key, batch), files) in &slots {
        let status = DirectoryStatus {
            path: key.batch_dir(*batch),
            date_range: key.date_range.clone(),
            category: key.category.clone(),
            batch: *batch,
            files: *files,
        };
        report.total_files += files;
        *report.by_date_range.entry(key.date_range.clone()).or_default() += files;
        *report.by_category.entry(key.category.clone()).or_default() += files;
        if *batch > 0 {
            report.batch_directories += 1;
        }
        report.max_batch = report.max_batch.max(*batch);
        if *files > cap {
            report.violations.push(status.clone());
        }
        report.directories.push(status);
        highest.entry(key).or_default().push(*batch);
    }

    for (key, batches) in highest {
        let top = batches.iter().copied().max().unwrap_or(0);
        for batch in (1..top).filter(|b| !batches.contains(b)) {
            report.gaps.push(key.batch_dir(batch));
        }
    }

    Ok(report)
}
