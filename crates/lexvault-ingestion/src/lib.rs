//! lexvault-ingestion: document ingestion and storage admission.
//!
//! Pipeline, leaves first:
//! - Credential rotation with per-credential backoff
//! - Quality gate (pure accept/reject scoring)
//! - Deduplication index over ids, content hashes and citations
//! - Bucketed file store with a per-directory file cap
//! - Best-effort mirror sink plus reconciliation
//! - Coordinator running concurrent producers against a target count

pub mod clock;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod mirror;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod sources;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{BackoffPolicy, CredentialExhausted, CredentialLease, CredentialPool};
pub use dedup::{Admission, DedupIndex, DedupKey, DedupKeys, DedupRecord};
pub use error::{IngestionError, Result, StoreError};
pub use mirror::{
    reconcile, LanceMirror, MemoryMirror, MirrorCounts, MirrorError, MirrorSink, ReconcileReport,
};
pub use models::{AdmittedDocument, CandidateDocument};
pub use pipeline::{Coordinator, CoordinatorConfig, IngestionSummary, StopSignal};
pub use quality::{QualityConfig, QualityGate, QualityVerdict, RejectReason};
pub use sources::{Producer, ProducerBatch, ProducerContext, ProducerError};
pub use store::{
    BucketKey, BucketedStore, DateRanges, DirectoryStatus, StoreConfig, StoreReport, StoredPath,
};
