//! CourtListener search producer.
//!
//! Endpoint: https://www.courtlistener.com/api/rest/v4/search/ (opinions,
//! `type=o`). Search hits only carry snippets, so each hit's opinion is then
//! fetched from `/api/rest/v4/opinions/{id}/` for its `plain_text`; the
//! snippet is kept when that fetch fails. Every request is authenticated with
//! its own pooled token (`Authorization: Token …`); 429 and 5xx responses
//! back that token off.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use lexvault_common::SandboxClient;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{Producer, ProducerBatch, ProducerContext, ProducerError};
use crate::credentials::{classify_status, BackoffPolicy, CredentialLease, CredentialPool, StatusClass};
use crate::models::CandidateDocument;

const SEARCH_URL: &str = "https://www.courtlistener.com/api/rest/v4/search/";
const OPINION_URL: &str = "https://www.courtlistener.com/api/rest/v4/opinions/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourtListenerConfig {
    pub base_url: String,
    pub queries: Vec<String>,
    /// Only opinions filed on or after this date.
    pub filed_after: Option<NaiveDate>,
    pub filed_before: Option<NaiveDate>,
    /// Result pages followed per query.
    pub max_pages: usize,
    pub cooldown_ms: u64,
    /// Opinion detail endpoint; the opinion id and `/` are appended.
    pub opinion_url: String,
    /// Replace search snippets with the full opinion text.
    pub fetch_full_text: bool,
}

impl Default for CourtListenerConfig {
    fn default() -> Self {
        Self {
            base_url: SEARCH_URL.to_string(),
            queries: Vec::new(),
            filed_after: None,
            filed_before: None,
            max_pages: 10,
            cooldown_ms: 2000,
            opinion_url: OPINION_URL.to_string(),
            fetch_full_text: true,
        }
    }
}

pub struct CourtListenerSource {
    client: SandboxClient,
    config: CourtListenerConfig,
    query_idx: usize,
    pages_fetched: usize,
    next_url: Option<String>,
    pending: VecDeque<CandidateDocument>,
}

impl CourtListenerSource {
    pub fn new(client: SandboxClient, config: CourtListenerConfig) -> Self {
        Self {
            client,
            config,
            query_idx: 0,
            pages_fetched: 0,
            next_url: None,
            pending: VecDeque::new(),
        }
    }

    fn done(&self) -> bool {
        self.pending.is_empty() && self.query_idx >= self.config.queries.len()
    }

    fn advance_query(&mut self) {
        self.query_idx += 1;
        self.pages_fetched = 0;
        self.next_url = None;
    }

    fn take(&mut self, max: usize) -> ProducerBatch {
        let n = max.min(self.pending.len());
        let documents = self.pending.drain(..n).collect();
        ProducerBatch { documents, exhausted: self.done() }
    }

    fn request(&self, query: &str) -> Result<reqwest::RequestBuilder, ProducerError> {
        if let Some(url) = &self.next_url {
            return Ok(self.client.get(url)?);
        }
        let mut params = vec![
            ("q", query.to_string()),
            ("type", "o".to_string()),
            ("order_by", "score desc".to_string()),
        ];
        if let Some(after) = self.config.filed_after {
            params.push(("filed_after", after.format("%Y-%m-%d").to_string()));
        }
        if let Some(before) = self.config.filed_before {
            params.push(("filed_before", before.format("%Y-%m-%d").to_string()));
        }
        Ok(self.client.get(&self.config.base_url)?.query(&params))
    }

    /// Fetch one result page for the current query into `pending`.
    #[instrument(skip(self, ctx))]
    async fn fetch_page(&mut self, ctx: &ProducerContext, query: String) -> Result<(), ProducerError> {
        let pool = ctx.credentials.as_ref().ok_or_else(|| {
            ProducerError::Fatal("courtlistener requires a credential pool".to_string())
        })?;
        let lease = pool.acquire()?;

        let response = self
            .request(&query)?
            .header(AUTHORIZATION, format!("Token {}", lease.token().expose_secret()))
            .send()
            .await
            .map_err(|e| ProducerError::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => {
                pool.report_success(&lease);
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| ProducerError::Upstream(format!("bad response body: {}", e)))?;
                let page = parse_search_page(&body);
                debug!(results = page.hits.len(), skipped = page.skipped, "Search page parsed");

                let mut full_text = 0;
                for mut hit in page.hits {
                    let wanted = self.config.fetch_full_text && !hit.full_text;
                    if let Some(id) = hit.opinion_id.filter(|_| wanted) {
                        if let Some(text) = self.fetch_opinion_text(pool, &ctx.backoff, id).await {
                            hit.document.content = text;
                            full_text += 1;
                        }
                    }
                    self.pending.push_back(hit.document);
                }
                debug!(full_text, "Opinion text fetched");
                self.pages_fetched += 1;
                match page.next {
                    Some(next) if self.pages_fetched < self.config.max_pages => {
                        self.next_url = Some(next);
                    }
                    _ => self.advance_query(),
                }
                Ok(())
            }
            StatusClass::Backoff => {
                let backoff = back_off(pool, &lease, &response, &ctx.backoff);
                warn!(
                    %status,
                    credential = %lease.label(),
                    backoff_secs = backoff.as_secs(),
                    "CourtListener throttled request"
                );
                Err(ProducerError::Upstream(format!("HTTP {}", status)))
            }
            StatusClass::Reject => {
                warn!(%status, "CourtListener rejected query, moving on");
                self.advance_query();
                Err(ProducerError::Upstream(format!("HTTP {} for query `{}`", status, query)))
            }
        }
    }

    /// Full text of one opinion, or `None` to keep the snippet.
    async fn fetch_opinion_text(
        &self,
        pool: &CredentialPool,
        backoff: &BackoffPolicy,
        opinion_id: u64,
    ) -> Option<String> {
        let lease = match pool.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                debug!(opinion_id, retry_at = %e.retry_at, "No credential for opinion text");
                return None;
            }
        };

        let url = format!("{}{}/", self.config.opinion_url, opinion_id);
        let response = self
            .client
            .get(&url)
            .ok()?
            .header(AUTHORIZATION, format!("Token {}", lease.token().expose_secret()))
            .send()
            .await;
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(opinion_id, error = %e, "Opinion request failed");
                return None;
            }
        };

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => {
                pool.report_success(&lease);
                let body: serde_json::Value = response.json().await.ok()?;
                body["plain_text"]
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .map(String::from)
            }
            StatusClass::Backoff => {
                let backoff = back_off(pool, &lease, &response, backoff);
                warn!(%status, opinion_id, backoff_secs = backoff.as_secs(), "Opinion request throttled");
                None
            }
            StatusClass::Reject => {
                debug!(%status, opinion_id, "Opinion not available");
                None
            }
        }
    }
}

/// Back off `lease`, honouring a longer `Retry-After` hint.
fn back_off(
    pool: &CredentialPool,
    lease: &CredentialLease,
    response: &reqwest::Response,
    policy: &BackoffPolicy,
) -> Duration {
    match retry_after(response) {
        Some(hinted) => {
            let backoff = pool.failure_backoff(lease, policy).max(hinted);
            pool.report_failure(lease, backoff);
            backoff
        }
        None => pool.report_failure_with(lease, policy),
    }
}

#[async_trait]
impl Producer for CourtListenerSource {
    fn name(&self) -> &str {
        "courtlistener"
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    fn cooldown(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.cooldown_ms))
    }

    async fn next_batch(
        &mut self,
        ctx: &ProducerContext,
        max: usize,
    ) -> Result<ProducerBatch, ProducerError> {
        if self.pending.is_empty() {
            if let Some(query) = self.config.queries.get(self.query_idx).cloned() {
                self.fetch_page(ctx, query).await?;
            }
        }
        Ok(self.take(max))
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// One search result.
#[derive(Debug)]
pub struct SearchHit {
    pub document: CandidateDocument,
    /// First opinion of the cluster, used to fetch the full text.
    pub opinion_id: Option<u64>,
    /// Content already holds full text rather than a snippet.
    pub full_text: bool,
}

/// Parsed search response.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub next: Option<String>,
    /// Results without usable text or filing date.
    pub skipped: usize,
}

pub fn parse_search_page(body: &serde_json::Value) -> SearchPage {
    let mut page = SearchPage {
        next: body["next"].as_str().map(String::from),
        ..Default::default()
    };

    for result in body["results"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        match parse_result(result) {
            Some(hit) => page.hits.push(hit),
            None => page.skipped += 1,
        }
    }
    page
}

fn parse_result(r: &serde_json::Value) -> Option<SearchHit> {
    let date_raw = r["dateFiled"].as_str()?;
    let date_filed = NaiveDate::parse_from_str(date_raw.get(..10)?, "%Y-%m-%d").ok()?;

    let full = ["plain_text", "text"]
        .iter()
        .find_map(|k| r[*k].as_str().filter(|s| !s.trim().is_empty()).map(String::from));
    let full_text = full.is_some();
    let content = full
        .or_else(|| {
            let snippets: Vec<&str> = r["opinions"]
                .as_array()?
                .iter()
                .filter_map(|o| o["snippet"].as_str())
                .filter(|s| !s.trim().is_empty())
                .collect();
            (!snippets.is_empty()).then(|| snippets.join("\n\n"))
        })
        .or_else(|| r["snippet"].as_str().filter(|s| !s.trim().is_empty()).map(String::from))?;

    let court = r["court"].as_str().unwrap_or_default();
    let mut doc = CandidateDocument::new(content, court_category(court), date_filed);

    let upstream_id = r["cluster_id"].as_u64().or_else(|| r["id"].as_u64());
    if let Some(id) = upstream_id {
        doc = doc.with_id(format!("cl_{}", id));
    }

    let citation = match &r["citation"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(|c| c.as_str().map(String::from)),
        _ => None,
    };
    if let Some(c) = citation {
        doc = doc.with_citation(c);
    }

    for key in ["caseName", "court", "court_id", "status", "absolute_url"] {
        if let Some(v) = r[key].as_str() {
            doc = doc.with_metadata(key, v);
        }
    }

    let opinion_id = r["opinions"]
        .as_array()
        .and_then(|ops| ops.iter().find_map(|o| o["id"].as_u64()));
    Some(SearchHit { document: doc, opinion_id, full_text })
}

/// Storage category for a court name.
pub fn court_category(court: &str) -> &'static str {
    let lower = court.to_lowercase();
    if lower.contains("supreme") {
        "supreme_court"
    } else if lower.contains("appeal") || lower.contains("circuit") {
        "circuit_courts"
    } else if lower.contains("district") {
        "district_courts"
    } else {
        "miscellaneous"
    }
}
