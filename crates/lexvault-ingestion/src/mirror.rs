//! Best-effort secondary store kept eventually consistent with the file store.
//!
//! Mirror failures never roll back or block a primary commit; anything the
//! mirror missed is picked up later by [`reconcile`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use lexvault_db::{DbError, DocumentRepository, MirrorDocument, SyncStatus};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::dedup::DedupKeys;
use crate::error::StoreError;
use crate::store::BucketedStore;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("mirror database error: {0}")]
    Db(#[from] DbError),

    #[error("mirror unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MirrorSink: Send + Sync {
    /// Insert one document. Inserting an id that is already present is a no-op.
    async fn insert(&self, doc: &MirrorDocument) -> Result<(), MirrorError>;

    /// Every id currently mirrored.
    async fn ids(&self) -> Result<HashSet<String>, MirrorError>;

    /// Dedup keys of everything mirrored, used to seed the index at startup.
    async fn dedup_keys(&self) -> Result<Vec<DedupKeys>, MirrorError> {
        Ok(Vec::new())
    }

    /// Row totals per category and per source.
    async fn counts(&self) -> Result<MirrorCounts, MirrorError> {
        Err(MirrorError::Unavailable("counts not supported by this mirror".into()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorCounts {
    pub total: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
}

/// LanceDB-backed mirror.
#[derive(Clone)]
pub struct LanceMirror {
    repo: DocumentRepository,
}

impl LanceMirror {
    pub fn new(repo: DocumentRepository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl MirrorSink for LanceMirror {
    async fn insert(&self, doc: &MirrorDocument) -> Result<(), MirrorError> {
        Ok(self.repo.insert(doc).await?)
    }

    async fn ids(&self) -> Result<HashSet<String>, MirrorError> {
        Ok(self.repo.ids().await?.into_iter().collect())
    }

    async fn dedup_keys(&self) -> Result<Vec<DedupKeys>, MirrorError> {
        Ok(self
            .repo
            .dedup_keys()
            .await?
            .into_iter()
            .map(|k| DedupKeys { id: k.id, content_hash: k.content_hash, citation: k.citation })
            .collect())
    }

    async fn counts(&self) -> Result<MirrorCounts, MirrorError> {
        Ok(MirrorCounts {
            total: self.repo.count().await?,
            by_category: self.repo.count_by("category").await?,
            by_source: self.repo.count_by("source").await?,
        })
    }
}

/// In-process mirror, keyed by id.
#[derive(Default, Clone)]
pub struct MemoryMirror {
    docs: Arc<Mutex<HashMap<String, MirrorDocument>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<MirrorDocument> {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).get(id).cloned()
    }
}

#[async_trait]
impl MirrorSink for MemoryMirror {
    async fn insert(&self, doc: &MirrorDocument) -> Result<(), MirrorError> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(doc.id.clone())
            .or_insert_with(|| doc.clone());
        Ok(())
    }

    async fn ids(&self) -> Result<HashSet<String>, MirrorError> {
        Ok(self.docs.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }

    async fn dedup_keys(&self) -> Result<Vec<DedupKeys>, MirrorError> {
        Ok(self
            .docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|d| DedupKeys {
                id: d.id.clone(),
                content_hash: d.content_hash.clone(),
                citation: d.citation.clone(),
            })
            .collect())
    }

    async fn counts(&self) -> Result<MirrorCounts, MirrorError> {
        let docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut counts = MirrorCounts { total: docs.len() as u64, ..Default::default() };
        for doc in docs.values() {
            *counts.by_category.entry(doc.category.clone()).or_default() += 1;
            *counts.by_source.entry(doc.source.clone()).or_default() += 1;
        }
        Ok(counts)
    }
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Readable documents found in the file store.
    pub scanned: usize,
    pub already_mirrored: usize,
    pub backfilled: usize,
    /// Documents the mirror refused; a later sweep retries them.
    pub failed: usize,
    /// Files in the store that could not be read.
    pub corrupt: usize,
}

/// Backfill every stored document whose id is absent from the mirror.
///
/// Idempotent: a second sweep over an unchanged store backfills nothing.
#[instrument(skip_all)]
pub async fn reconcile(
    sink: &dyn MirrorSink,
    store: &BucketedStore,
) -> Result<ReconcileReport, MirrorError> {
    let mirrored = sink.ids().await?;

    let records = store.list_all();
    let scan = tokio::task::spawn_blocking(move || {
        let mut report = ReconcileReport::default();
        let mut missing = Vec::new();
        for record in records {
            match record {
                Ok(record) => {
                    report.scanned += 1;
                    if mirrored.contains(&record.keys.id) {
                        report.already_mirrored += 1;
                    } else if let Some(path) = record.path {
                        missing.push(path);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable stored document");
                    report.corrupt += 1;
                }
            }
        }
        (report, missing)
    })
    .await
    .map_err(|e| MirrorError::Unavailable(format!("store scan failed: {}", e)))?;

    let (mut report, missing) = scan;
    let now = Utc::now();
    for path in missing {
        let doc = match store.load(&path).await {
            Ok(doc) => doc,
            Err(e @ StoreError::Corrupt { .. }) | Err(e @ StoreError::Io(_)) => {
                warn!(path = %path.display(), error = %e, "Stored document vanished or became unreadable");
                report.corrupt += 1;
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load stored document");
                report.failed += 1;
                continue;
            }
        };

        match sink.insert(&doc.to_mirror(SyncStatus::Backfilled, now)).await {
            Ok(()) => report.backfilled += 1,
            Err(e) => {
                warn!(id = %doc.id, error = %e, "Backfill insert failed");
                report.failed += 1;
            }
        }
    }

    info!(
        scanned = report.scanned,
        already_mirrored = report.already_mirrored,
        backfilled = report.backfilled,
        failed = report.failed,
        corrupt = report.corrupt,
        "Reconciliation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(id: &str) -> MirrorDocument {
        MirrorDocument {
            id: id.into(),
            content: "body".into(),
            category: "contracts".into(),
            date_filed: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            citation: None,
            source: "test".into(),
            source_metadata: serde_json::json!({}),
            content_hash: format!("hash-{}", id),
            quality_score: 0.5,
            admitted_at: Utc::now(),
            bucket_path: "2021-2022/contracts".into(),
            sync_status: SyncStatus::Live,
            mirrored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_mirror_insert_is_idempotent() {
        let mirror = MemoryMirror::new();
        let mut first = row("a");
        mirror.insert(&first).await.unwrap();
        first.content = "changed".into();
        mirror.insert(&first).await.unwrap();

        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.get("a").unwrap().content, "body");
        assert_eq!(mirror.dedup_keys().await.unwrap()[0].content_hash, "hash-a");
    }

    #[tokio::test]
    async fn test_memory_mirror_counts_by_category_and_source() {
        let mirror = MemoryMirror::new();
        mirror.insert(&row("a")).await.unwrap();
        mirror.insert(&row("b")).await.unwrap();
        let mut other = row("c");
        other.category = "torts".into();
        other.source = "courtlistener".into();
        mirror.insert(&other).await.unwrap();

        let counts = mirror.counts().await.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.by_category["contracts"], 2);
        assert_eq!(counts.by_category["torts"], 1);
        assert_eq!(counts.by_source["test"], 2);
        assert_eq!(counts.by_source["courtlistener"], 1);
    }
}
