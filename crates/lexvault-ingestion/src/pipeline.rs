//! Ingestion coordinator.
//!
//! Per candidate:
//!   1. Quality gate (reject is terminal)
//!   2. Reserve one slot of the admission budget
//!   3. Dedup index check-and-insert (duplicate is terminal)
//!   4. Durable commit to the bucketed store
//!   5. Hand-off to the mirror worker (best effort)
//!
//! Producers run as concurrent tasks pulling bounded batches, pausing for
//! their cooldown between batches and for credential backoff when every
//! token is parked. Stopping is cooperative: a candidate not yet committed
//! when the stop lands is dropped, and queued mirror inserts are abandoned
//! for `reconcile` to repair.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lexvault_db::SyncStatus;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::credentials::{BackoffPolicy, CredentialPool};
use crate::dedup::{content_hash, Admission, DedupIndex, SeedReport};
use crate::error::{IngestionError, Result};
use crate::mirror::MirrorSink;
use crate::models::{normalize_citation, normalize_id, AdmittedDocument, CandidateDocument};
use crate::quality::{QualityGate, QualityVerdict};
use crate::sources::{Producer, ProducerContext, ProducerError};
use crate::store::BucketedStore;

/// Shortest pause before retrying after a credential wait.
const MIN_CREDENTIAL_WAIT: Duration = Duration::from_millis(10);
/// Poll interval while the budget is fully reserved by in-flight commits.
const BUDGET_POLL: Duration = Duration::from_millis(5);

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on candidates requested per `next_batch` call.
    pub batch_size: usize,
    /// Pause between batches for producers without their own cooldown.
    pub default_cooldown: Duration,
    /// Longest single wait on credential backoff before polling again.
    pub max_credential_wait: Duration,
    /// Stop the run after this long, as if cancelled.
    pub max_run_duration: Option<Duration>,
    pub max_error_samples: usize,
    /// A producer is retired after this many upstream errors in a row.
    pub max_consecutive_upstream_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            default_cooldown: Duration::from_secs(1),
            max_credential_wait: Duration::from_secs(15 * 60),
            max_run_duration: None,
            max_error_samples: 20,
            max_consecutive_upstream_failures: 5,
        }
    }
}

// ── Stop signal ───────────────────────────────────────────────────────────────

/// Cooperative stop flag shared between the caller and a running coordinator.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    Deadline,
}

#[derive(Clone)]
struct RunControl {
    stop: StopSignal,
    deadline: Option<tokio::time::Instant>,
}

impl RunControl {
    fn halt(&self) -> Option<Halt> {
        if self.stop.is_stopped() {
            Some(Halt::Cancelled)
        } else if self.deadline.map_or(false, |d| tokio::time::Instant::now() >= d) {
            Some(Halt::Deadline)
        } else {
            None
        }
    }

    async fn halted(&self) -> Halt {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = self.stop.stopped() => Halt::Cancelled,
            _ = deadline => Halt::Deadline,
        }
    }

    /// Sleep for `duration`; returns early with the halt reason if stopped.
    async fn pause(&self, duration: Duration) -> Option<Halt> {
        if let Some(halt) = self.halt() {
            return Some(halt);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            halt = self.halted() => Some(halt),
        }
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProducerStatus {
    Exhausted,
    TargetReached,
    Cancelled,
    DeadlineReached,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerReport {
    pub name: String,
    pub batches: usize,
    #[serde(flatten)]
    pub status: ProducerStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub candidates: usize,
    pub admitted: usize,
    pub quality_rejected: usize,
    pub duplicates: usize,
    pub persistence_errors: usize,
    pub upstream_errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub synced: usize,
    pub failed: usize,
    /// Queued inserts dropped because the run was stopped.
    pub abandoned: usize,
}

/// Startup seeding of the dedup index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub store: SeedReport,
    pub mirror_loaded: usize,
    pub mirror_unavailable: bool,
}

/// Final structured report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub target: usize,
    pub admitted: usize,
    pub cancelled: bool,
    pub deadline_reached: bool,
    pub candidates: usize,
    pub quality_rejected: usize,
    pub rejections_by_reason: BTreeMap<String, usize>,
    pub duplicates: usize,
    pub duplicates_by_key: BTreeMap<String, usize>,
    pub credential_waits: usize,
    pub persistence_errors: usize,
    pub upstream_errors: usize,
    /// Candidates that passed the gate but were dropped by a stop before commit.
    pub dropped_on_stop: usize,
    pub mirror: MirrorStats,
    pub by_source: BTreeMap<String, SourceStats>,
    pub by_category: BTreeMap<String, usize>,
    pub by_year: BTreeMap<i32, usize>,
    pub producers: Vec<ProducerReport>,
    pub errors_total: usize,
    pub error_samples: Vec<String>,
}

#[derive(Default)]
struct RunStats {
    candidates: usize,
    quality_rejected: usize,
    rejections_by_reason: BTreeMap<String, usize>,
    duplicates: usize,
    duplicates_by_key: BTreeMap<String, usize>,
    credential_waits: usize,
    persistence_errors: usize,
    upstream_errors: usize,
    dropped_on_stop: usize,
    by_source: BTreeMap<String, SourceStats>,
    by_category: BTreeMap<String, usize>,
    by_year: BTreeMap<i32, usize>,
    errors_total: usize,
    error_samples: Vec<String>,
}

impl RunStats {
    fn source(&mut self, name: &str) -> &mut SourceStats {
        self.by_source.entry(name.to_string()).or_default()
    }

    fn record_error(&mut self, limit: usize, message: String) {
        self.errors_total += 1;
        if self.error_samples.len() < limit {
            self.error_samples.push(message);
        }
    }
}

// ── Shared run state ──────────────────────────────────────────────────────────

struct RunShared {
    gate: QualityGate,
    dedup: Arc<DedupIndex>,
    store: Arc<BucketedStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    ctx: ProducerContext,
    control: RunControl,
    target: usize,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    stats: Mutex<RunStats>,
}

enum Processed {
    Continue,
    TargetReached,
    Halted(Halt),
}

impl RunShared {
    fn stats(&self) -> std::sync::MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target_reached(&self) -> bool {
        self.committed.load(Ordering::SeqCst) >= self.target
    }

    fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.target).then_some(n + 1))
            .is_ok()
    }

    fn release(&self) {
        self.reserved.fetch_sub(1, Ordering::SeqCst);
    }

    /// Wait for a budget slot. `Err` once the target is met or the run halts.
    async fn reserve(&self) -> std::result::Result<(), Processed> {
        loop {
            if self.try_reserve() {
                return Ok(());
            }
            if self.target_reached() {
                return Err(Processed::TargetReached);
            }
            if let Some(halt) = self.control.pause(BUDGET_POLL).await {
                return Err(Processed::Halted(halt));
            }
        }
    }

    fn admit(&self, source: &str, candidate: CandidateDocument, score: f64) -> AdmittedDocument {
        let key = self.store.route(candidate.date_filed, &candidate.category);
        let id = candidate
            .id
            .as_deref()
            .and_then(normalize_id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        AdmittedDocument {
            id,
            content_hash: content_hash(&candidate.content),
            citation: normalize_citation(candidate.citation.as_deref()),
            content: candidate.content,
            category: key.category,
            date_filed: candidate.date_filed,
            source: source.to_string(),
            source_metadata: candidate.source_metadata,
            quality_score: score,
            admitted_at: self.clock.now(),
            bucket_path: String::new(),
        }
    }

    async fn process(
        &self,
        source: &str,
        candidate: CandidateDocument,
        mirror_tx: Option<&mpsc::UnboundedSender<AdmittedDocument>>,
    ) -> Processed {
        {
            let mut stats = self.stats();
            stats.candidates += 1;
            stats.source(source).candidates += 1;
        }

        let score = match self.gate.evaluate(source, &candidate) {
            QualityVerdict::Accept(score) => score,
            QualityVerdict::Reject(reason) => {
                debug!(source = %source, reason = %reason, "Quality rejection");
                let mut stats = self.stats();
                stats.quality_rejected += 1;
                *stats.rejections_by_reason.entry(reason.label().to_string()).or_default() += 1;
                stats.source(source).quality_rejected += 1;
                return Processed::Continue;
            }
        };

        if let Err(outcome) = self.reserve().await {
            if matches!(outcome, Processed::Halted(_)) {
                self.stats().dropped_on_stop += 1;
            }
            return outcome;
        }

        if let Some(halt) = self.control.halt() {
            self.release();
            self.stats().dropped_on_stop += 1;
            return Processed::Halted(halt);
        }

        let mut doc = self.admit(source, candidate, score);
        let keys = doc.keys();
        if let Admission::DuplicateOf(key) = self.dedup.try_admit(&keys) {
            self.release();
            debug!(source = %source, id = %doc.id, key = %key, "Duplicate");
            let mut stats = self.stats();
            stats.duplicates += 1;
            *stats.duplicates_by_key.entry(key.as_str().to_string()).or_default() += 1;
            stats.source(source).duplicates += 1;
            return Processed::Continue;
        }

        if let Some(halt) = self.control.halt() {
            self.dedup.release(&keys);
            self.release();
            self.stats().dropped_on_stop += 1;
            return Processed::Halted(halt);
        }

        match self.store.commit(&mut doc).await {
            Ok(stored) => {
                self.committed.fetch_add(1, Ordering::SeqCst);
                debug!(source = %source, id = %doc.id, path = %stored.path.display(), "Admitted");
                {
                    let mut stats = self.stats();
                    stats.source(source).admitted += 1;
                    *stats.by_category.entry(doc.category.clone()).or_default() += 1;
                    *stats.by_year.entry(doc.year()).or_default() += 1;
                }
                if let Some(tx) = mirror_tx {
                    // The worker only exits after every sender is gone.
                    let _ = tx.send(doc);
                }
            }
            Err(e) => {
                self.dedup.release(&keys);
                self.release();
                warn!(source = %source, id = %doc.id, error = %e, "Commit failed");
                let mut stats = self.stats();
                stats.persistence_errors += 1;
                stats.source(source).persistence_errors += 1;
                let limit = self.config.max_error_samples;
                stats.record_error(limit, e.to_string());
            }
        }

        if self.target_reached() {
            Processed::TargetReached
        } else {
            Processed::Continue
        }
    }
}

fn halt_status(halt: Halt) -> ProducerStatus {
    match halt {
        Halt::Cancelled => ProducerStatus::Cancelled,
        Halt::Deadline => ProducerStatus::DeadlineReached,
    }
}

#[instrument(skip_all, fields(source = %producer.name()))]
async fn drive_producer(
    shared: Arc<RunShared>,
    mut producer: Box<dyn Producer>,
    mirror_tx: Option<mpsc::UnboundedSender<AdmittedDocument>>,
) -> ProducerReport {
    let name = producer.name().to_string();
    let cooldown = producer.cooldown().unwrap_or(shared.config.default_cooldown);
    let mut batches = 0;
    let mut consecutive_failures = 0u32;

    let status = 'run: loop {
        if let Some(halt) = shared.control.halt() {
            break halt_status(halt);
        }
        if shared.target_reached() {
            break ProducerStatus::TargetReached;
        }

        let pulled = tokio::select! {
            r = producer.next_batch(&shared.ctx, shared.config.batch_size) => r,
            halt = shared.control.halted() => break 'run halt_status(halt),
        };

        match pulled {
            Ok(batch) => {
                batches += 1;
                consecutive_failures = 0;
                debug!(documents = batch.documents.len(), exhausted = batch.exhausted, "Batch pulled");

                for candidate in batch.documents {
                    match shared.process(&name, candidate, mirror_tx.as_ref()).await {
                        Processed::Continue => {}
                        Processed::TargetReached => break 'run ProducerStatus::TargetReached,
                        Processed::Halted(halt) => break 'run halt_status(halt),
                    }
                }
                if batch.exhausted {
                    break ProducerStatus::Exhausted;
                }
            }
            Err(ProducerError::CredentialExhausted(exhausted)) => {
                shared.stats().credential_waits += 1;
                let wait = (exhausted.retry_at - shared.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .clamp(MIN_CREDENTIAL_WAIT, shared.config.max_credential_wait.max(MIN_CREDENTIAL_WAIT));
                info!(retry_at = %exhausted.retry_at, wait_ms = wait.as_millis() as u64, "Waiting for credential backoff");
                if let Some(halt) = shared.control.pause(wait).await {
                    break halt_status(halt);
                }
                continue;
            }
            Err(ProducerError::Upstream(message)) => {
                consecutive_failures += 1;
                warn!(error = %message, consecutive = consecutive_failures, "Upstream error");
                {
                    let mut stats = shared.stats();
                    stats.upstream_errors += 1;
                    stats.source(&name).upstream_errors += 1;
                    let limit = shared.config.max_error_samples;
                    stats.record_error(limit, format!("{}: {}", name, message));
                }
                if consecutive_failures >= shared.config.max_consecutive_upstream_failures {
                    break ProducerStatus::Failed {
                        reason: format!("{} consecutive upstream errors, last: {}", consecutive_failures, message),
                    };
                }
            }
            Err(e) => {
                warn!(error = %e, "Producer failed");
                let limit = shared.config.max_error_samples;
                shared.stats().record_error(limit, format!("{}: {}", name, e));
                break ProducerStatus::Failed { reason: e.to_string() };
            }
        }

        if let Some(halt) = shared.control.pause(cooldown).await {
            break halt_status(halt);
        }
    };

    info!(batches, status = ?status, "Producer finished");
    ProducerReport { name, batches, status }
}

/// Drain admitted documents into the mirror, after their commit.
fn spawn_mirror_worker(
    sink: Arc<dyn MirrorSink>,
    abandon: Arc<AtomicBool>,
    error_limit: usize,
) -> (
    mpsc::UnboundedSender<AdmittedDocument>,
    tokio::task::JoinHandle<(MirrorStats, Vec<String>)>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<AdmittedDocument>();

    let handle = tokio::spawn(async move {
        let mut stats = MirrorStats::default();
        let mut errors = Vec::new();
        while let Some(doc) = rx.recv().await {
            if abandon.load(Ordering::SeqCst) {
                stats.abandoned += 1;
                continue;
            }
            match sink.insert(&doc.to_mirror(SyncStatus::Live, Utc::now())).await {
                Ok(()) => stats.synced += 1,
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "Mirror insert failed; reconcile will backfill");
                    stats.failed += 1;
                    if errors.len() < error_limit {
                        errors.push(format!("mirror {}: {}", doc.id, e));
                    }
                }
            }
        }
        (stats, errors)
    });

    (tx, handle)
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct Coordinator {
    config: CoordinatorConfig,
    gate: QualityGate,
    dedup: Arc<DedupIndex>,
    store: Arc<BucketedStore>,
    mirror: Option<Arc<dyn MirrorSink>>,
    credentials: Option<Arc<CredentialPool>>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
    stop: StopSignal,
    seeded: AtomicBool,
}

impl Coordinator {
    pub fn new(store: Arc<BucketedStore>, gate: QualityGate, config: CoordinatorConfig) -> Self {
        Self {
            config,
            gate,
            dedup: Arc::new(DedupIndex::new()),
            store,
            mirror: None,
            credentials: None,
            backoff: BackoffPolicy::default(),
            clock: Arc::new(SystemClock),
            stop: StopSignal::new(),
            seeded: AtomicBool::new(false),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn MirrorSink>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_credentials(mut self, pool: Arc<CredentialPool>) -> Self {
        self.credentials = Some(pool);
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn store(&self) -> &BucketedStore {
        &self.store
    }

    /// Seed the dedup index from the file store and, if present, the mirror.
    ///
    /// [`run`](Self::run) calls this itself when it has not happened yet.
    /// A mirror that cannot be read is logged and skipped.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let records = self.store.list_all();
        let dedup = Arc::clone(&self.dedup);
        let store_report = tokio::task::spawn_blocking(move || dedup.seed(records))
            .await
            .map_err(|e| IngestionError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut report = BootstrapReport { store: store_report, ..Default::default() };

        if let Some(mirror) = &self.mirror {
            match mirror.dedup_keys().await {
                Ok(keys) => {
                    report.mirror_loaded = keys.len();
                    let records = keys
                        .into_iter()
                        .map(|keys| Ok::<_, std::convert::Infallible>(crate::dedup::DedupRecord { keys, path: None }));
                    self.dedup.seed(records);
                }
                Err(e) => {
                    warn!(error = %e, "Mirror unavailable during seeding; using file store only");
                    report.mirror_unavailable = true;
                }
            }
        }

        info!(
            stored = report.store.loaded,
            corrupt = report.store.skipped,
            mirrored = report.mirror_loaded,
            index = self.dedup.len(),
            "Dedup index seeded"
        );
        self.seeded.store(true, Ordering::SeqCst);
        Ok(report)
    }

    fn validate(&self, producers: &[Box<dyn Producer>]) -> Result<()> {
        if self.config.batch_size == 0 {
            return Err(IngestionError::Config("batch_size must be at least 1".into()));
        }
        if self.credentials.is_none() {
            if let Some(p) = producers.iter().find(|p| p.requires_credentials()) {
                return Err(IngestionError::Config(format!(
                    "producer `{}` requires credentials but no credential pool is configured",
                    p.name()
                )));
            }
        }
        Ok(())
    }

    /// Run `producers` until `target` documents are admitted, every producer
    /// is exhausted or failed, or the run is stopped.
    ///
    /// The dedup index is seeded first unless [`bootstrap`](Self::bootstrap)
    /// already ran.
    ///
    /// Only configuration problems are returned as errors; per-item failures
    /// are counted in the summary.
    #[instrument(skip(self, producers), fields(producers = producers.len()))]
    pub async fn run(&self, producers: Vec<Box<dyn Producer>>, target: usize) -> Result<IngestionSummary> {
        self.validate(&producers)?;
        if !self.seeded.load(Ordering::SeqCst) {
            self.bootstrap().await?;
        }

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let started = Instant::now();
        info!(run_id = %run_id, target, "Starting ingestion run");

        let control = RunControl {
            stop: self.stop.clone(),
            deadline: self.config.max_run_duration.map(|d| tokio::time::Instant::now() + d),
        };

        let shared = Arc::new(RunShared {
            gate: self.gate.clone(),
            dedup: Arc::clone(&self.dedup),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            ctx: ProducerContext {
                credentials: self.credentials.clone(),
                backoff: self.backoff.clone(),
            },
            control: control.clone(),
            target,
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            stats: Mutex::new(RunStats::default()),
        });

        let abandon = Arc::new(AtomicBool::new(false));
        let (mirror_tx, mirror_worker) = match &self.mirror {
            Some(sink) => {
                let (tx, handle) =
                    spawn_mirror_worker(Arc::clone(sink), Arc::clone(&abandon), self.config.max_error_samples);
                (Some(tx), Some(handle))
            }
            None => (None, None),
        };

        let names: Vec<String> = producers.iter().map(|p| p.name().to_string()).collect();
        let handles: Vec<_> = producers
            .into_iter()
            .map(|p| tokio::spawn(drive_producer(Arc::clone(&shared), p, mirror_tx.clone())))
            .collect();
        drop(mirror_tx);

        let mut reports = Vec::with_capacity(handles.len());
        for (handle, name) in handles.into_iter().zip(names) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(source = %name, error = %e, "Producer task aborted");
                    reports.push(ProducerReport {
                        name,
                        batches: 0,
                        status: ProducerStatus::Failed { reason: format!("task aborted: {}", e) },
                    });
                }
            }
        }

        let halted = control.halt().is_some()
            || reports.iter().any(|r| {
                matches!(r.status, ProducerStatus::Cancelled | ProducerStatus::DeadlineReached)
            });
        if halted {
            abandon.store(true, Ordering::SeqCst);
        }

        let (mirror, mirror_errors) = match mirror_worker {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Mirror worker aborted");
                (MirrorStats::default(), vec![format!("mirror worker aborted: {}", e)])
            }),
            None => (MirrorStats::default(), Vec::new()),
        };

        let stats = std::mem::take(&mut *shared.stats());
        let mut error_samples = stats.error_samples;
        let room = self.config.max_error_samples.saturating_sub(error_samples.len());
        error_samples.extend(mirror_errors.into_iter().take(room));

        let summary = IngestionSummary {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            duration_ms: started.elapsed().as_millis() as u64,
            target,
            admitted: shared.committed.load(Ordering::SeqCst),
            cancelled: self.stop.is_stopped(),
            deadline_reached: reports.iter().any(|r| r.status == ProducerStatus::DeadlineReached),
            candidates: stats.candidates,
            quality_rejected: stats.quality_rejected,
            rejections_by_reason: stats.rejections_by_reason,
            duplicates: stats.duplicates,
            duplicates_by_key: stats.duplicates_by_key,
            credential_waits: stats.credential_waits,
            persistence_errors: stats.persistence_errors,
            upstream_errors: stats.upstream_errors,
            dropped_on_stop: stats.dropped_on_stop,
            mirror,
            by_source: stats.by_source,
            by_category: stats.by_category,
            by_year: stats.by_year,
            producers: reports,
            errors_total: stats.errors_total + mirror.failed,
            error_samples,
        };

        info!(
            run_id = %run_id,
            admitted = summary.admitted,
            duplicates = summary.duplicates,
            rejected = summary.quality_rejected,
            persistence_errors = summary.persistence_errors,
            mirror_failed = summary.mirror.failed,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Ingestion run finished"
        );
        Ok(summary)
    }
}
