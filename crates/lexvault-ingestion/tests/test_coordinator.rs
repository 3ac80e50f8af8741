//! Coordinator runs against in-memory and scripted producers.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use lexvault_ingestion::clock::ManualClock;
use lexvault_ingestion::credentials::CredentialExhausted;
use lexvault_ingestion::pipeline::ProducerStatus;
use lexvault_ingestion::sources::MemorySource;
use lexvault_db::MirrorDocument;
use lexvault_ingestion::{
    CandidateDocument, Clock, Coordinator, CoordinatorConfig, IngestionError, MemoryMirror,
    MirrorError, MirrorSink, Producer, ProducerBatch, ProducerContext, ProducerError,
    QualityConfig, QualityGate, StopSignal,
};
use lexvault_ingestion::store::{BucketedStore, StoreConfig};
use tempfile::TempDir;

fn candidate(id: &str, body: &str, year: i32, category: &str) -> CandidateDocument {
    CandidateDocument::new(
        format!("{} The court applied the statute and the controlling precedent.", body),
        category,
        NaiveDate::from_ymd_opt(year, 4, 1).unwrap(),
    )
    .with_id(id)
}

fn unique(n: usize) -> Vec<CandidateDocument> {
    (0..n)
        .map(|i| candidate(&format!("doc{}", i), &format!("Unique body {}.", i), 2019 + (i % 6) as i32, "supreme_court"))
        .collect()
}

fn lenient_gate() -> QualityGate {
    QualityGate::new(QualityConfig { min_word_count: 5, min_score: 0.0, ..Default::default() })
}

fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        batch_size: 4,
        default_cooldown: Duration::ZERO,
        ..Default::default()
    }
}

async fn open_store(dir: &TempDir) -> Arc<BucketedStore> {
    Arc::new(BucketedStore::open(StoreConfig::new(dir.path())).await.unwrap())
}

fn boxed(p: impl Producer + 'static) -> Box<dyn Producer> {
    Box::new(p)
}

#[tokio::test]
async fn test_identical_content_with_new_id_is_hash_duplicate() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());

    let docs = vec![
        candidate("first", "Same words.", 2023, "supreme_court"),
        candidate("second", "Same words.", 2023, "supreme_court"),
    ];
    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", docs))], 10)
        .await
        .unwrap();

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.duplicates_by_key.get("content_hash"), Some(&1));
    assert_eq!(store.list_all().count(), 1);
    assert_eq!(summary.producers[0].status, ProducerStatus::Exhausted);
}

#[tokio::test]
async fn test_rejections_are_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());

    let mut docs = unique(3);
    docs.push(CandidateDocument::new("too short", "contracts", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
    docs.push(CandidateDocument::new(
        "plenty of words here but no category at all",
        "  ",
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
    ));

    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", docs))], 100)
        .await
        .unwrap();
    assert_eq!(summary.admitted, 3);
    assert_eq!(summary.candidates, 5);
    assert_eq!(summary.quality_rejected, 2);
    assert_eq!(summary.rejections_by_reason.get("too_short"), Some(&1));
    assert_eq!(summary.rejections_by_reason.get("missing_field"), Some(&1));
    assert_eq!(summary.by_source["mem"].quality_rejected, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_target_is_exact_across_producers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());

    let a: Vec<_> = unique(20);
    let b: Vec<_> = (0..20)
        .map(|i| candidate(&format!("other{}", i), &format!("Other body {}.", i), 2024, "circuit_courts"))
        .collect();
    let summary = coordinator
        .run(vec![boxed(MemorySource::new("a", a)), boxed(MemorySource::new("b", b))], 7)
        .await
        .unwrap();

    assert_eq!(summary.admitted, 7);
    assert_eq!(store.file_count().await, 7);
    assert_eq!(store.list_all().count(), 7);
    assert!(summary
        .producers
        .iter()
        .any(|p| p.status == ProducerStatus::TargetReached));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_producers_admit_each_document_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let mirror = MemoryMirror::new();
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config())
        .with_mirror(Arc::new(mirror.clone()));

    let producers = (0..4)
        .map(|i| boxed(MemorySource::new(format!("copy{}", i), unique(25))))
        .collect();
    let summary = coordinator.run(producers, 1000).await.unwrap();

    assert_eq!(summary.admitted, 25);
    assert_eq!(summary.duplicates, 75);
    assert_eq!(store.list_all().count(), 25);
    assert_eq!(summary.mirror.synced, 25);
    assert_eq!(mirror.len(), 25);
    let per_year: usize = summary.by_year.values().sum();
    assert_eq!(per_year, 25);
}

#[tokio::test]
async fn test_rerun_after_restart_admits_nothing() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir).await;
        let coordinator = Coordinator::new(store, lenient_gate(), fast_config());
        let summary = coordinator
            .run(vec![boxed(MemorySource::new("mem", unique(6)))], 100)
            .await
            .unwrap();
        assert_eq!(summary.admitted, 6);
    }

    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());
    let boot = coordinator.bootstrap().await.unwrap();
    assert_eq!(boot.store.loaded, 6);

    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", unique(6)))], 100)
        .await
        .unwrap();
    assert_eq!(summary.admitted, 0);
    assert_eq!(summary.duplicates_by_key.get("id"), Some(&6));
    assert_eq!(store.list_all().count(), 6);
}

#[tokio::test]
async fn test_run_seeds_index_without_explicit_bootstrap() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = Coordinator::new(open_store(&dir).await, lenient_gate(), fast_config());
        coordinator
            .run(vec![boxed(MemorySource::new("mem", unique(3)))], 100)
            .await
            .unwrap();
    }

    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());
    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", unique(3)))], 100)
        .await
        .unwrap();

    assert_eq!(summary.admitted, 0);
    assert_eq!(summary.duplicates, 3);
    assert_eq!(store.list_all().count(), 3);
    assert_eq!(store.file_count().await, 3);
    assert_eq!(coordinator.dedup().len(), 3);
}

#[tokio::test]
async fn test_candidates_count_only_processed_items() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let config = CoordinatorConfig { batch_size: 8, ..fast_config() };
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), config);

    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", unique(8)))], 2)
        .await
        .unwrap();

    assert_eq!(summary.admitted, 2);
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.candidates, summary.by_source["mem"].candidates);
}

#[tokio::test]
async fn test_commit_failure_is_counted_and_keys_released() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());
    // A plain file where the date-range directory should be.
    let blocker = dir.path().join("2023-2024");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let blocked = candidate("blocked", "Blocked body.", 2023, "supreme_court");
    let open = candidate("open", "Open body.", 2021, "supreme_court");
    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", vec![blocked.clone(), open]))], 10)
        .await
        .unwrap();

    assert_eq!(summary.persistence_errors, 1);
    assert_eq!(summary.by_source["mem"].persistence_errors, 1);
    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.errors_total, 1);
    assert!(summary.error_samples[0].contains("blocked"));
    assert_eq!(store.file_count().await, 1);

    std::fs::remove_file(&blocker).unwrap();
    let retry = coordinator
        .run(vec![boxed(MemorySource::new("mem", vec![blocked]))], 10)
        .await
        .unwrap();
    assert_eq!(retry.admitted, 1);
    assert_eq!(retry.duplicates, 0);
    assert!(dir.path().join("2023-2024/supreme_court/blocked.json").exists());
}

/// Mirror whose inserts take an hour of (paused) time.
#[derive(Clone, Default)]
struct SlowMirror {
    inner: MemoryMirror,
}

#[async_trait]
impl MirrorSink for SlowMirror {
    async fn insert(&self, doc: &MirrorDocument) -> Result<(), MirrorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.inner.insert(doc).await
    }

    async fn ids(&self) -> Result<HashSet<String>, MirrorError> {
        self.inner.ids().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_abandons_queued_mirror_inserts() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let stop = StopSignal::new();
    let mirror = SlowMirror::default();
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config())
        .with_mirror(Arc::new(mirror.clone()))
        .with_stop_signal(stop.clone());

    let docs = unique(8);
    let producer = StopsAfterFirstBatch {
        stop: stop.clone(),
        batches: VecDeque::from(vec![docs[..4].to_vec(), docs[4..].to_vec()]),
    };
    let summary = coordinator.run(vec![boxed(producer)], 100).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.admitted, 4);
    assert!(summary.mirror.abandoned > 0);
    assert_eq!(
        summary.mirror.synced + summary.mirror.failed + summary.mirror.abandoned,
        summary.admitted
    );
    assert_eq!(mirror.inner.len(), summary.mirror.synced);
    assert_eq!(store.list_all().count(), 4);
}

#[tokio::test]
async fn test_missing_credential_pool_is_config_error() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(open_store(&dir).await, lenient_gate(), fast_config());
    let producer = MemorySource::new("needs-keys", unique(1)).with_credentials_required();

    let err = coordinator.run(vec![boxed(producer)], 1).await.unwrap_err();
    assert!(matches!(err, IngestionError::Config(_)));
}

#[tokio::test]
async fn test_stopped_before_start_commits_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let stop = StopSignal::new();
    let coordinator =
        Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config()).with_stop_signal(stop.clone());
    stop.stop();

    let summary = coordinator
        .run(vec![boxed(MemorySource::new("mem", unique(5)))], 5)
        .await
        .unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.admitted, 0);
    assert_eq!(store.list_all().count(), 0);
    assert_eq!(summary.producers[0].status, ProducerStatus::Cancelled);
}

/// Emits one batch, then raises the stop signal from inside the next pull.
struct StopsAfterFirstBatch {
    stop: StopSignal,
    batches: VecDeque<Vec<CandidateDocument>>,
}

#[async_trait]
impl Producer for StopsAfterFirstBatch {
    fn name(&self) -> &str {
        "stopper"
    }

    async fn next_batch(&mut self, _ctx: &ProducerContext, _max: usize) -> Result<ProducerBatch, ProducerError> {
        if self.batches.len() < 2 {
            self.stop.stop();
        }
        Ok(ProducerBatch::more(self.batches.pop_front().unwrap_or_default()))
    }
}

#[tokio::test]
async fn test_cancel_mid_run_keeps_committed_documents() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let stop = StopSignal::new();
    let coordinator =
        Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config()).with_stop_signal(stop.clone());

    let docs = unique(8);
    let producer = StopsAfterFirstBatch {
        stop: stop.clone(),
        batches: VecDeque::from(vec![docs[..4].to_vec(), docs[4..].to_vec()]),
    };
    let summary = coordinator.run(vec![boxed(producer)], 100).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.admitted, 4);
    assert_eq!(summary.dropped_on_stop, 1);
    assert_eq!(store.list_all().count(), 4);
    assert!(store.list_all().all(|r| r.is_ok()));
}

/// Reports every credential backed off once, then yields documents.
struct WaitsForCredential {
    retry_at: Option<chrono::DateTime<Utc>>,
    docs: Vec<CandidateDocument>,
}

#[async_trait]
impl Producer for WaitsForCredential {
    fn name(&self) -> &str {
        "throttled"
    }

    async fn next_batch(&mut self, _ctx: &ProducerContext, _max: usize) -> Result<ProducerBatch, ProducerError> {
        if let Some(retry_at) = self.retry_at.take() {
            return Err(CredentialExhausted { retry_at }.into());
        }
        Ok(ProducerBatch::last(std::mem::take(&mut self.docs)))
    }
}

#[tokio::test(start_paused = true)]
async fn test_credential_exhaustion_pauses_until_backoff_expiry() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config())
        .with_clock(clock.clone());

    let producer = WaitsForCredential {
        retry_at: Some(clock.now() + chrono::Duration::seconds(30)),
        docs: unique(2),
    };
    let before = tokio::time::Instant::now();
    let summary = coordinator.run(vec![boxed(producer)], 10).await.unwrap();

    assert!(before.elapsed() >= Duration::from_secs(30));
    assert_eq!(summary.credential_waits, 1);
    assert_eq!(summary.admitted, 2);
}

/// Never runs dry.
struct Endless {
    next: usize,
}

#[async_trait]
impl Producer for Endless {
    fn name(&self) -> &str {
        "endless"
    }

    fn cooldown(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }

    async fn next_batch(&mut self, _ctx: &ProducerContext, max: usize) -> Result<ProducerBatch, ProducerError> {
        let docs = (self.next..self.next + max)
            .map(|i| candidate(&format!("e{}", i), &format!("Endless body {}.", i), 2025, "contracts"))
            .collect();
        self.next += max;
        Ok(ProducerBatch::more(docs))
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let config = CoordinatorConfig {
        max_run_duration: Some(Duration::from_secs(10)),
        ..fast_config()
    };
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), config);

    let summary = coordinator
        .run(vec![boxed(Endless { next: 0 })], 1_000_000)
        .await
        .unwrap();

    assert!(summary.deadline_reached);
    assert!(!summary.cancelled);
    assert_eq!(summary.producers[0].status, ProducerStatus::DeadlineReached);
    assert!(summary.admitted > 0);
    assert_eq!(store.list_all().count(), summary.admitted);
}

struct AlwaysFailing;

#[async_trait]
impl Producer for AlwaysFailing {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn next_batch(&mut self, _ctx: &ProducerContext, _max: usize) -> Result<ProducerBatch, ProducerError> {
        Err(ProducerError::Upstream("HTTP 503".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failures_retire_producer_only() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let coordinator = Coordinator::new(Arc::clone(&store), lenient_gate(), fast_config());

    let summary = coordinator
        .run(vec![boxed(AlwaysFailing), boxed(MemorySource::new("mem", unique(3)))], 100)
        .await
        .unwrap();

    assert_eq!(summary.upstream_errors, 5);
    assert_eq!(summary.admitted, 3);
    let flaky = summary.producers.iter().find(|p| p.name == "flaky").unwrap();
    assert!(matches!(flaky.status, ProducerStatus::Failed { .. }));
    assert_eq!(summary.error_samples.len(), 5);
    assert_eq!(summary.by_source["flaky"].upstream_errors, 5);
}
