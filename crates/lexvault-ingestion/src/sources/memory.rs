//! In-memory producer over a fixed list of candidates.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use super::{Producer, ProducerBatch, ProducerContext, ProducerError};
use crate::models::CandidateDocument;

pub struct MemorySource {
    name: String,
    pending: VecDeque<CandidateDocument>,
    cooldown: Option<Duration>,
    requires_credentials: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, documents: Vec<CandidateDocument>) -> Self {
        Self {
            name: name.into(),
            pending: documents.into(),
            cooldown: None,
            requires_credentials: false,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Declare that this producer needs a credential pool (for wiring checks).
    pub fn with_credentials_required(mut self) -> Self {
        self.requires_credentials = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl Producer for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_credentials(&self) -> bool {
        self.requires_credentials
    }

    fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    async fn next_batch(
        &mut self,
        _ctx: &ProducerContext,
        max: usize,
    ) -> Result<ProducerBatch, ProducerError> {
        let take = max.min(self.pending.len());
        let documents: Vec<_> = self.pending.drain(..take).collect();
        Ok(ProducerBatch { documents, exhausted: self.pending.is_empty() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_drains_in_bounded_batches() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let docs = (0..5).map(|i| CandidateDocument::new(format!("doc {}", i), "contracts", date)).collect();
        let mut source = MemorySource::new("mem", docs);
        let ctx = ProducerContext::default();

        let first = source.next_batch(&ctx, 3).await.unwrap();
        assert_eq!(first.documents.len(), 3);
        assert!(!first.exhausted);
        let second = source.next_batch(&ctx, 3).await.unwrap();
        assert_eq!(second.documents.len(), 2);
        assert!(second.exhausted);
        assert_eq!(source.remaining(), 0);
    }
}
