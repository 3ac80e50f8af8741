//! Credential rotation and backoff with an injected clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use lexvault_ingestion::{Clock, CredentialPool, ManualClock};
use secrecy::{ExposeSecret, SecretString};

fn pool_with(labels: &[&str]) -> (Arc<CredentialPool>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
    let tokens = labels
        .iter()
        .map(|l| (l.to_string(), SecretString::from(format!("token-{}", l))))
        .collect();
    let pool = CredentialPool::with_labels(tokens, clock.clone()).unwrap();
    (Arc::new(pool), clock)
}

#[test]
fn test_backed_off_key_is_skipped_for_its_whole_backoff() {
    let (pool, clock) = pool_with(&["A", "B"]);

    let a = pool.acquire().unwrap();
    assert_eq!(a.label(), "A");
    pool.report_failure(&a, Duration::from_secs(60));

    let next = pool.acquire().unwrap();
    assert_eq!(next.label(), "B");
    assert_eq!(next.token().expose_secret(), "token-B");

    for _ in 0..59 {
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(pool.acquire().unwrap().label(), "B");
    }

    clock.advance(chrono::Duration::seconds(1));
    let labels: Vec<_> = (0..2).map(|_| pool.acquire().unwrap().label().to_string()).collect();
    assert!(labels.contains(&"A".to_string()));
}

#[test]
fn test_exhausted_pool_recovers_after_earliest_expiry() {
    let (pool, clock) = pool_with(&["A", "B", "C"]);
    let durations = [90, 30, 60];
    for secs in durations {
        let lease = pool.acquire().unwrap();
        pool.report_failure(&lease, Duration::from_secs(secs));
    }

    let exhausted = pool.acquire().unwrap_err();
    assert_eq!(exhausted.retry_at, clock.now() + chrono::Duration::seconds(30));

    clock.set(exhausted.retry_at);
    assert_eq!(pool.acquire().unwrap().label(), "B");
    // B is in use again; A and C are still parked.
    let snapshot = pool.snapshot();
    assert_eq!(snapshot.iter().filter(|s| s.failure_count == 1).count(), 3);
}

#[test]
fn test_concurrent_acquire_never_returns_backed_off_key() {
    let (pool, _clock) = pool_with(&["A", "B", "C", "D"]);
    let parked = pool.acquire().unwrap();
    pool.report_failure(&parked, Duration::from_secs(600));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| {
                        let lease = pool.acquire().unwrap();
                        pool.report_success(&lease);
                        lease.label().to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().iter().all(|label| label != "A"));
    }
}
