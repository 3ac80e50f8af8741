//! Quality gate: a pure accept/reject decision over a candidate.
//!
//! Checks run in a fixed order: required fields, minimum length, then the
//! weighted score against `min_score`. The gate holds no state beyond its
//! configuration, so the same candidate always gets the same verdict.

use std::collections::HashMap;
use std::fmt;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::models::{normalize_category, CandidateDocument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_word_count: usize,
    pub min_score: f64,
    /// Terms whose presence raises the content score.
    pub legal_terms: Vec<String>,
    pub content_weight: f64,
    pub recency_weight: f64,
    pub trust_weight: f64,
    /// Documents filed in or after this year get full recency credit.
    pub reference_year: i32,
    /// Recency credit lost per year before `reference_year`.
    pub recency_decay: f64,
    /// Trust per producer name, in `[0, 1]`.
    pub source_trust: HashMap<String, f64>,
    pub default_trust: f64,
    pub require_citation: bool,
    /// Metadata keys every candidate must carry.
    pub required_metadata: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_word_count: 1200,
            min_score: 0.5,
            legal_terms: ["court", "law", "statute", "precedent", "jurisdiction", "constitutional"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            content_weight: 0.8,
            recency_weight: 0.1,
            trust_weight: 0.1,
            reference_year: 2025,
            recency_decay: 0.1,
            source_trust: HashMap::new(),
            default_trust: 0.7,
            require_citation: false,
            required_metadata: Vec::new(),
        }
    }
}

/// Why a candidate was turned away.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    MissingField { field: String },
    TooShort { words: usize, min: usize },
    BelowThreshold { score: f64, min: f64 },
}

impl RejectReason {
    /// Stable label used as a counter key.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::MissingField { .. } => "missing_field",
            RejectReason::TooShort { .. } => "too_short",
            RejectReason::BelowThreshold { .. } => "below_threshold",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingField { field } => write!(f, "missing required field `{}`", field),
            RejectReason::TooShort { words, min } => write!(f, "{} words, need {}", words, min),
            RejectReason::BelowThreshold { score, min } => {
                write!(f, "score {:.3} below threshold {:.3}", score, min)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accept(f64),
    Reject(RejectReason),
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn evaluate(&self, source: &str, candidate: &CandidateDocument) -> QualityVerdict {
        if let Some(field) = self.missing_field(candidate) {
            return QualityVerdict::Reject(RejectReason::MissingField { field });
        }

        let words = candidate.word_count();
        if words < self.config.min_word_count {
            return QualityVerdict::Reject(RejectReason::TooShort {
                words,
                min: self.config.min_word_count,
            });
        }

        let score = self.score(source, candidate, words);
        if score < self.config.min_score {
            return QualityVerdict::Reject(RejectReason::BelowThreshold {
                score,
                min: self.config.min_score,
            });
        }
        QualityVerdict::Accept(score)
    }

    fn missing_field(&self, candidate: &CandidateDocument) -> Option<String> {
        if candidate.content.trim().is_empty() {
            return Some("content".to_string());
        }
        if normalize_category(&candidate.category).is_empty() {
            return Some("category".to_string());
        }
        let has_citation = candidate
            .citation
            .as_deref()
            .map_or(false, |c| !c.trim().is_empty());
        if self.config.require_citation && !has_citation {
            return Some("citation".to_string());
        }
        self.config
            .required_metadata
            .iter()
            .find(|key| !candidate.source_metadata.contains_key(key.as_str()))
            .cloned()
    }

    fn score(&self, source: &str, candidate: &CandidateDocument, words: usize) -> f64 {
        let c = &self.config;
        let content = self.content_score(candidate, words);

        let years_behind = (c.reference_year - candidate.date_filed.year()).max(0) as f64;
        let recency = (1.0 - c.recency_decay * years_behind).clamp(0.0, 1.0);

        let trust = c
            .source_trust
            .get(source)
            .copied()
            .unwrap_or(c.default_trust)
            .clamp(0.0, 1.0);

        let total_weight = c.content_weight + c.recency_weight + c.trust_weight;
        if total_weight <= 0.0 {
            return content;
        }
        let blended =
            (c.content_weight * content + c.recency_weight * recency + c.trust_weight * trust)
                / total_weight;
        blended.clamp(0.0, 1.0)
    }

    /// Length, terminology and citation signals, capped at 1.0.
    fn content_score(&self, candidate: &CandidateDocument, words: usize) -> f64 {
        let mut score = 0.5;
        if words > 2000 {
            score += 0.1;
        }
        if words > 3000 {
            score += 0.2;
        }

        let lower = candidate.content.to_lowercase();
        let hits = self
            .config
            .legal_terms
            .iter()
            .filter(|term| lower.contains(&term.to_lowercase()))
            .count();
        score += (hits as f64 * 0.05).min(0.3);

        if candidate.citation.as_deref().map_or(false, |c| !c.trim().is_empty()) {
            score += 0.1;
        }
        score.min(1.0)
    }
}
