//! Error types for the ingestion crate.
//!
//! Quality rejections and duplicates are not errors; they are values of
//! `QualityVerdict` and `Admission`. What remains here is configuration and
//! persistence.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    /// Invalid configuration detected at startup. The only run-level failure.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("mirror error: {0}")]
    Mirror(#[from] crate::mirror::MirrorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the primary file store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Write failed twice for a single document; the bucket count is unchanged.
    #[error("failed to persist `{id}` to {}: {source}", path.display())]
    Persistence {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored file that cannot be read back as a document.
    #[error("corrupt record at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid store configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IngestionError>;
