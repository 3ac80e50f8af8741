//! Data models for the ingestion pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use lexvault_db::{MirrorDocument, SyncStatus};
use serde::{Deserialize, Serialize};

use crate::dedup::DedupKeys;

/// Open key/value metadata attached by a producer.
pub type SourceMetadata = BTreeMap<String, serde_json::Value>;

/// Ids longer than this are truncated before they become file names.
const MAX_ID_LEN: usize = 200;

/// A document as emitted by a producer, before any admission decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDocument {
    /// Externally supplied id; one is assigned on admission when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    /// Court type or legal domain, e.g. `supreme_court`, `contracts`.
    pub category: String,
    pub date_filed: NaiveDate,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub source_metadata: SourceMetadata,
}

impl CandidateDocument {
    pub fn new(content: impl Into<String>, category: impl Into<String>, date_filed: NaiveDate) -> Self {
        Self {
            id: None,
            content: content.into(),
            category: category.into(),
            date_filed,
            citation: None,
            source_metadata: SourceMetadata::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.source_metadata.insert(key.into(), value.into());
        self
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    pub fn year(&self) -> i32 {
        self.date_filed.year()
    }
}

/// A candidate that passed the quality gate and the dedup index.
///
/// `bucket_path` stays empty until the bucketed store resolves it during
/// commit; after that the document is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmittedDocument {
    pub id: String,
    pub content: String,
    pub category: String,
    pub date_filed: NaiveDate,
    pub citation: Option<String>,
    /// Name of the producer that emitted the candidate.
    pub source: String,
    #[serde(default)]
    pub source_metadata: SourceMetadata,
    pub content_hash: String,
    pub quality_score: f64,
    pub admitted_at: DateTime<Utc>,
    #[serde(default)]
    pub bucket_path: String,
}

impl AdmittedDocument {
    pub fn keys(&self) -> DedupKeys {
        DedupKeys {
            id: self.id.clone(),
            content_hash: self.content_hash.clone(),
            citation: self.citation.clone(),
        }
    }

    pub fn year(&self) -> i32 {
        self.date_filed.year()
    }

    /// Shape this document as a mirror row.
    pub fn to_mirror(&self, sync_status: SyncStatus, mirrored_at: DateTime<Utc>) -> MirrorDocument {
        MirrorDocument {
            id: self.id.clone(),
            content: self.content.clone(),
            category: self.category.clone(),
            date_filed: self.date_filed,
            citation: self.citation.clone(),
            source: self.source.clone(),
            source_metadata: serde_json::Value::Object(
                self.source_metadata.clone().into_iter().collect(),
            ),
            content_hash: self.content_hash.clone(),
            quality_score: self.quality_score,
            admitted_at: self.admitted_at,
            bucket_path: self.bucket_path.clone(),
            sync_status,
            mirrored_at,
        }
    }
}

// ── Normalisation ─────────────────────────────────────────────────────────────

/// Make a supplied id safe to use as a file name.
///
/// Keeps `[A-Za-z0-9_.-]`, replaces anything else with `_`, strips leading
/// dots and truncates long ids. Returns `None` when nothing usable remains.
pub fn normalize_id(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = cleaned.chars().take(MAX_ID_LEN).collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned)
    }
}

/// Lower-case slug used as the category directory name.
///
/// "Supreme Court" and "supreme_court" both map to `supreme_court`.
pub fn normalize_category(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Trim and collapse internal whitespace; empty citations count as absent.
pub fn normalize_citation(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() { None } else { Some(collapsed) }
}
