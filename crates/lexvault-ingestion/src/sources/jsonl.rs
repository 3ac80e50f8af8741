//! JSON-lines import: one `CandidateDocument` per line.
//!
//! Blank lines are ignored. Lines that fail to parse are skipped, logged and
//! counted; they never stop the import.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

use super::{Producer, ProducerBatch, ProducerContext, ProducerError};
use crate::models::CandidateDocument;

pub struct JsonlSource {
    name: String,
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line_no: usize,
    skipped: usize,
    done: bool,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::named("jsonl", path)
    }

    pub fn named(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            lines: None,
            line_no: 0,
            skipped: 0,
            done: false,
        }
    }

    /// Malformed lines seen so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[async_trait]
impl Producer for JsonlSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(
        &mut self,
        _ctx: &ProducerContext,
        max: usize,
    ) -> Result<ProducerBatch, ProducerError> {
        if self.done {
            return Ok(ProducerBatch::last(Vec::new()));
        }

        if self.lines.is_none() {
            let file = File::open(&self.path).await.map_err(|e| {
                ProducerError::Fatal(format!("cannot open {}: {}", self.path.display(), e))
            })?;
            self.lines = Some(BufReader::new(file).lines());
            debug!(path = %self.path.display(), "Opened JSON-lines import");
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(ProducerBatch::last(Vec::new()));
        };

        let mut documents = Vec::with_capacity(max);
        while documents.len() < max {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    return Err(ProducerError::Upstream(format!(
                        "read error in {} after line {}: {}",
                        self.path.display(),
                        self.line_no,
                        e
                    )))
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CandidateDocument>(&line) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    self.skipped += 1;
                    warn!(
                        source = %self.name,
                        line = self.line_no,
                        error = %e,
                        "Skipping malformed line"
                    );
                }
            }
        }

        if self.done {
            debug!(source = %self.name, lines = self.line_no, skipped = self.skipped, "Import finished");
        }
        Ok(ProducerBatch { documents, exhausted: self.done })
    }
}
