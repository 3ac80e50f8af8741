//! Deduplication index.
//!
//! Three sets (ids, content hashes, non-empty citations) behind one mutex so
//! that check-and-insert is a single critical section: of two racing
//! admissions sharing any key, exactly one is admitted.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::models::normalize_citation;

/// Which key collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    Id,
    ContentHash,
    Citation,
}

impl DedupKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupKey::Id => "id",
            DedupKey::ContentHash => "content_hash",
            DedupKey::Citation => "citation",
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key triple of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKeys {
    pub id: String,
    pub content_hash: String,
    pub citation: Option<String>,
}

impl DedupKeys {
    /// Citation in the same normalized form admission writes.
    fn citation(&self) -> Option<String> {
        normalize_citation(self.citation.as_deref())
    }
}

/// Keys of an already-stored document, as read back during seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub keys: DedupKeys,
    /// Where the record came from, when it is a file.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    DuplicateOf(DedupKey),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub loaded: usize,
    /// Records that could not be read and were skipped.
    pub skipped: usize,
}

#[derive(Default)]
struct Sets {
    ids: HashSet<String>,
    hashes: HashSet<String>,
    citations: HashSet<String>,
}

impl Sets {
    fn collision(&self, keys: &DedupKeys) -> Option<DedupKey> {
        if self.ids.contains(&keys.id) {
            return Some(DedupKey::Id);
        }
        if self.hashes.contains(&keys.content_hash) {
            return Some(DedupKey::ContentHash);
        }
        match keys.citation() {
            Some(c) if self.citations.contains(&c) => Some(DedupKey::Citation),
            _ => None,
        }
    }

    fn insert(&mut self, keys: &DedupKeys) {
        self.ids.insert(keys.id.clone());
        self.hashes.insert(keys.content_hash.clone());
        if let Some(c) = keys.citation() {
            self.citations.insert(c);
        }
    }
}

#[derive(Default)]
pub struct DedupIndex {
    sets: Mutex<Sets>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bulk-load existing records. Unreadable records are skipped and counted.
    ///
    /// Keys shared between existing records are loaded without complaint; the
    /// corpus is taken as it is.
    pub fn seed<I, E>(&self, records: I) -> SeedReport
    where
        I: IntoIterator<Item = Result<DedupRecord, E>>,
        E: fmt::Display,
    {
        let mut report = SeedReport::default();
        let mut sets = self.lock();
        for record in records {
            match record {
                Ok(record) => {
                    sets.insert(&record.keys);
                    report.loaded += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable record during seed");
                    report.skipped += 1;
                }
            }
        }
        debug!(loaded = report.loaded, skipped = report.skipped, "Dedup index seeded");
        report
    }

    /// Check all keys and, only if none collide, insert all of them.
    pub fn try_admit(&self, keys: &DedupKeys) -> Admission {
        let mut sets = self.lock();
        if let Some(key) = sets.collision(keys) {
            return Admission::DuplicateOf(key);
        }
        sets.insert(keys);
        Admission::Admitted
    }

    /// Undo an admission whose commit failed.
    pub fn release(&self, keys: &DedupKeys) {
        let mut sets = self.lock();
        sets.ids.remove(&keys.id);
        sets.hashes.remove(&keys.content_hash);
        if let Some(c) = keys.citation() {
            sets.citations.remove(&c);
        }
    }

    pub fn contains(&self, keys: &DedupKeys) -> Option<DedupKey> {
        self.lock().collision(keys)
    }

    /// Number of distinct ids held.
    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-256 of the content, hex encoded.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
