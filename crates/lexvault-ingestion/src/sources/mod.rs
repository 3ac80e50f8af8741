//! Document producers.

pub mod courtlistener;
pub mod jsonl;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lexvault_common::LexvaultError;
use thiserror::Error;

use crate::credentials::{BackoffPolicy, CredentialExhausted, CredentialPool};
use crate::models::CandidateDocument;

pub use courtlistener::{CourtListenerConfig, CourtListenerSource};
pub use jsonl::JsonlSource;
pub use memory::MemorySource;

/// Shared resources handed to every `next_batch` call.
#[derive(Clone, Default)]
pub struct ProducerContext {
    pub credentials: Option<Arc<CredentialPool>>,
    pub backoff: BackoffPolicy,
}

/// One pull from a producer.
#[derive(Debug, Default)]
pub struct ProducerBatch {
    pub documents: Vec<CandidateDocument>,
    /// No further batches will follow.
    pub exhausted: bool,
}

impl ProducerBatch {
    pub fn more(documents: Vec<CandidateDocument>) -> Self {
        Self { documents, exhausted: false }
    }

    pub fn last(documents: Vec<CandidateDocument>) -> Self {
        Self { documents, exhausted: true }
    }
}

#[derive(Error, Debug)]
pub enum ProducerError {
    /// Every credential is backed off; retry after the contained instant.
    #[error(transparent)]
    CredentialExhausted(#[from] CredentialExhausted),

    /// Transient upstream failure; the producer may be polled again.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The producer cannot continue.
    #[error("producer failed: {0}")]
    Fatal(String),

    #[error(transparent)]
    Sandbox(#[from] LexvaultError),
}

/// A source of candidate documents.
///
/// Producers are pulled in bounded batches by the coordinator, each on its
/// own task. Authenticated producers acquire a credential from
/// `ctx.credentials` per outbound request and report the outcome back.
#[async_trait]
pub trait Producer: Send {
    fn name(&self) -> &str;

    fn requires_credentials(&self) -> bool {
        false
    }

    /// Pause between batches; the coordinator default applies when `None`.
    fn cooldown(&self) -> Option<Duration> {
        None
    }

    async fn next_batch(
        &mut self,
        ctx: &ProducerContext,
        max: usize,
    ) -> Result<ProducerBatch, ProducerError>;
}
