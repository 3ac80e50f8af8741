//! Schema definitions for LanceDB tables.
//!
//! LanceDB stores Arrow record batches; the Rust-side row type lives here and
//! the Arrow conversion lives in `schema_arrow`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const TABLE_DOCUMENTS: &str = "legal_documents";

/// How a mirror row came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Inserted by the ingestion run right after the primary commit.
    Live,
    /// Inserted later by a reconciliation sweep.
    Backfilled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Live       => "live",
            SyncStatus::Backfilled => "backfilled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live"       => Some(SyncStatus::Live),
            "backfilled" => Some(SyncStatus::Backfilled),
            _ => None,
        }
    }
}

// =============================================================================
// Document Schema
// =============================================================================

/// One admitted document as stored in the mirror table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorDocument {
    pub id: String,
    pub content: String,
    pub category: String,
    pub date_filed: NaiveDate,
    pub citation: Option<String>,
    pub source: String,
    /// Open key/value metadata, stored as JSON text.
    pub source_metadata: serde_json::Value,
    pub content_hash: String,
    pub quality_score: f64,
    pub admitted_at: DateTime<Utc>,
    /// Directory of the primary copy, relative to the store root.
    pub bucket_path: String,
    pub sync_status: SyncStatus,
    pub mirrored_at: DateTime<Utc>,
}

/// The dedup-relevant slice of a mirror row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorKeys {
    pub id: String,
    pub content_hash: String,
    pub citation: Option<String>,
}
