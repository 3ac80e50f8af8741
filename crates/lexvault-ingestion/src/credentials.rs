//! Upstream credential rotation.
//!
//! A fixed set of API tokens is handed out round-robin. A credential that
//! failed is parked until its `backoff_until` passes; nothing is ever removed
//! from the pool.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::IngestionError;

/// Every credential is backed off.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all credentials backed off until {retry_at}")]
pub struct CredentialExhausted {
    /// Earliest moment any credential becomes selectable again.
    pub retry_at: DateTime<Utc>,
}

/// A credential handed out by [`CredentialPool::acquire`].
#[derive(Clone)]
pub struct CredentialLease {
    index: usize,
    label: String,
    token: Arc<SecretString>,
}

impl CredentialLease {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }
}

impl std::fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("index", &self.index)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of one credential, without the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub label: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub backoff_until: Option<DateTime<Utc>>,
    pub failure_count: u32,
}

struct Slot {
    label: String,
    token: Arc<SecretString>,
    last_used_at: Option<DateTime<Utc>>,
    backoff_until: Option<DateTime<Utc>>,
    failure_count: u32,
}

struct PoolState {
    slots: Vec<Slot>,
    cursor: usize,
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    /// Labels the tokens `key-0`, `key-1`, … in the order given.
    pub fn new(tokens: Vec<SecretString>, clock: Arc<dyn Clock>) -> Result<Self, IngestionError> {
        let labelled = tokens
            .into_iter()
            .enumerate()
            .map(|(i, t)| (format!("key-{}", i), t))
            .collect();
        Self::with_labels(labelled, clock)
    }

    pub fn with_labels(
        tokens: Vec<(String, SecretString)>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IngestionError> {
        if tokens.is_empty() {
            return Err(IngestionError::Config(
                "credential pool needs at least one token".to_string(),
            ));
        }

        let slots = tokens
            .into_iter()
            .map(|(label, token)| Slot {
                label,
                token: Arc::new(token),
                last_used_at: None,
                backoff_until: None,
                failure_count: 0,
            })
            .collect();

        Ok(Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            clock,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next credential in rotation that is not backed off.
    ///
    /// Skipped credentials are passed over by the rotation pointer.
    pub fn acquire(&self) -> Result<CredentialLease, CredentialExhausted> {
        let now = self.clock.now();
        let mut state = self.lock();
        let n = state.slots.len();

        for step in 0..n {
            let idx = (state.cursor + step) % n;
            let slot = &state.slots[idx];
            if slot.backoff_until.map_or(true, |until| until <= now) {
                let lease = CredentialLease {
                    index: idx,
                    label: slot.label.clone(),
                    token: Arc::clone(&slot.token),
                };
                state.cursor = (idx + 1) % n;
                return Ok(lease);
            }
        }

        let retry_at = state
            .slots
            .iter()
            .filter_map(|s| s.backoff_until)
            .min()
            .unwrap_or(now);
        debug!(%retry_at, "All credentials backed off");
        Err(CredentialExhausted { retry_at })
    }

    pub fn report_success(&self, lease: &CredentialLease) {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(lease.index) {
            slot.failure_count = 0;
            slot.last_used_at = Some(now);
        }
    }

    /// Park the credential for `backoff` and move the rotation past it.
    pub fn report_failure(&self, lease: &CredentialLease, backoff: Duration) {
        let now = self.clock.now();
        let until = chrono::Duration::from_std(backoff)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut state = self.lock();
        let n = state.slots.len();
        if let Some(slot) = state.slots.get_mut(lease.index) {
            slot.backoff_until = Some(until);
            slot.failure_count = slot.failure_count.saturating_add(1);
            slot.last_used_at = Some(now);
            warn!(
                credential = %slot.label,
                failures = slot.failure_count,
                backoff_secs = backoff.as_secs(),
                "Credential backed off"
            );
        }
        if state.cursor == lease.index {
            state.cursor = (lease.index + 1) % n;
        }
    }

    /// Backoff the next failure of this credential would earn under `policy`.
    pub fn failure_backoff(&self, lease: &CredentialLease, policy: &BackoffPolicy) -> Duration {
        let failures = self
            .lock()
            .slots
            .get(lease.index)
            .map_or(0, |s| s.failure_count);
        policy.delay_for(failures.saturating_add(1))
    }

    /// Report a failure with a backoff derived from the consecutive failure count.
    pub fn report_failure_with(&self, lease: &CredentialLease, policy: &BackoffPolicy) -> Duration {
        let backoff = self.failure_backoff(lease, policy);
        self.report_failure(lease, backoff);
        backoff
    }

    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        self.lock()
            .slots
            .iter()
            .map(|s| CredentialStatus {
                label: s.label.clone(),
                last_used_at: s.last_used_at,
                backoff_until: s.backoff_until,
                failure_count: s.failure_count,
            })
            .collect()
    }
}

// ── Backoff policy ────────────────────────────────────────────────────────────

/// Exponential backoff for consecutive failures of one credential.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            multiplier: 2.0,
            max: Duration::from_secs(15 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Backoff after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// How a producer should treat an upstream HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Rate limited or server-side failure: back the credential off.
    Backoff,
    /// Client error unrelated to rate limiting; the credential stays usable.
    Reject,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Backoff
    } else {
        StatusClass::Reject
    }
}
