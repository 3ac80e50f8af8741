//! lexvault-agent: runs an ingestion pass, a mirror reconciliation sweep or
//! a storage verification.
//!
//! Usage: `lexvault-agent [ingest|reconcile|status]` (default `ingest`).

mod config;

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, MirrorBackend, MirrorConfig, SourceConfig};
use lexvault_common::SandboxClient;
use lexvault_db::{Database, DocumentRepository};
use lexvault_ingestion::sources::{CourtListenerSource, JsonlSource};
use lexvault_ingestion::store::BucketedStore;
use lexvault_ingestion::{
    reconcile, Coordinator, CredentialPool, LanceMirror, MemoryMirror, MirrorCounts, MirrorSink,
    Producer, QualityGate, StoreReport, SystemClock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Ingest,
    Reconcile,
    Status,
}

fn parse_command(arg: Option<&str>) -> anyhow::Result<Command> {
    match arg {
        None | Some("ingest") => Ok(Command::Ingest),
        Some("reconcile") => Ok(Command::Reconcile),
        Some("status") => Ok(Command::Status),
        Some(other) => {
            anyhow::bail!("unknown command `{}` (expected ingest, reconcile or status)", other)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lexvault=debug,info")),
        )
        .init();

    let command = parse_command(std::env::args().nth(1).as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), ?command, "lexvault starting");

    let config = Config::load()?;
    let store_config = config.store.store_config().context("invalid [store] section")?;
    let store = Arc::new(BucketedStore::open(store_config).await?);
    info!(root = %store.root().display(), cap = store.cap(), "Store opened");

    let mirror = open_mirror(&config.mirror).await?;

    match command {
        Command::Ingest => ingest(&config, store, mirror).await,
        Command::Reconcile => {
            let Some(mirror) = mirror else {
                anyhow::bail!("reconcile needs a mirror backend; [mirror] backend is \"none\"");
            };
            let report = reconcile(mirror.as_ref(), &store).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status => {
            let report = status(&store, mirror.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.store.violations.is_empty() {
                anyhow::bail!(
                    "{} director{} over the cap of {}",
                    report.store.violations.len(),
                    if report.store.violations.len() == 1 { "y is" } else { "ies are" },
                    report.store.cap
                );
            }
            if !report.store.valid {
                warn!("Store layout has inconsistencies; see report");
            }
            Ok(())
        }
    }
}

/// Store verification plus mirror totals.
#[derive(Debug, Serialize)]
struct StatusReport {
    store: StoreReport,
    mirror: Option<MirrorCounts>,
    /// Why mirror counts are missing when a mirror is configured.
    mirror_error: Option<String>,
}

async fn status(
    store: &BucketedStore,
    mirror: Option<&dyn MirrorSink>,
) -> anyhow::Result<StatusReport> {
    let store = store.status().await.context("verifying store")?;
    let (mirror, mirror_error) = match mirror {
        Some(sink) => match sink.counts().await {
            Ok(counts) => {
                if counts.total != store.total_files as u64 {
                    warn!(mirror = counts.total, store = store.total_files, "Mirror out of step; run reconcile");
                }
                (Some(counts), None)
            }
            Err(e) => {
                warn!(error = %e, "Mirror counts unavailable");
                (None, Some(e.to_string()))
            }
        },
        None => (None, None),
    };
    Ok(StatusReport { store, mirror, mirror_error })
}

async fn open_mirror(config: &MirrorConfig) -> anyhow::Result<Option<Arc<dyn MirrorSink>>> {
    match config.backend {
        MirrorBackend::Lancedb => {
            let db = Database::open(&config.path)
                .await
                .with_context(|| format!("opening mirror database at {}", config.path))?;
            db.initialize().await?;
            info!(path = %config.path, "LanceDB mirror ready");
            let repo = DocumentRepository::new(Arc::new(db));
            Ok(Some(Arc::new(LanceMirror::new(repo))))
        }
        MirrorBackend::Memory => {
            warn!("In-memory mirror selected; rows are lost on exit");
            Ok(Some(Arc::new(MemoryMirror::default())))
        }
        MirrorBackend::None => Ok(None),
    }
}

fn build_producers(config: &Config) -> anyhow::Result<Vec<Box<dyn Producer>>> {
    let mut producers: Vec<Box<dyn Producer>> = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        match source {
            SourceConfig::CourtListener(cl) => {
                let mut client = SandboxClient::new()?;
                for domain in &config.sandbox.allowed_domains {
                    client.allow_domain(domain);
                }
                producers.push(Box::new(CourtListenerSource::new(client, cl.clone())));
            }
            SourceConfig::Jsonl { name: Some(name), path } => {
                producers.push(Box::new(JsonlSource::named(name.clone(), path)));
            }
            SourceConfig::Jsonl { name: None, path } => {
                producers.push(Box::new(JsonlSource::new(path)));
            }
        }
    }
    if producers.is_empty() {
        anyhow::bail!("no [[sources]] configured; nothing to ingest");
    }
    Ok(producers)
}

async fn ingest(
    config: &Config,
    store: Arc<BucketedStore>,
    mirror: Option<Arc<dyn MirrorSink>>,
) -> anyhow::Result<()> {
    let producers = build_producers(config)?;

    let mut coordinator = Coordinator::new(
        store,
        QualityGate::new(config.quality.clone()),
        config.ingestion.coordinator_config(),
    )
    .with_backoff(config.backoff.policy());

    if let Some(mirror) = mirror {
        coordinator = coordinator.with_mirror(mirror);
    }

    let tokens = config.credentials.tokens();
    if tokens.is_empty() {
        warn!(env = %config.credentials.tokens_env, "No API tokens found");
    } else {
        let pool = CredentialPool::new(tokens, Arc::new(SystemClock))?;
        info!(keys = pool.len(), "Credential pool ready");
        coordinator = coordinator.with_credentials(Arc::new(pool));
    }

    let boot = coordinator.bootstrap().await?;
    info!(
        loaded = boot.store.loaded,
        skipped = boot.store.skipped,
        mirror_loaded = boot.mirror_loaded,
        "Dedup index seeded"
    );

    let stop = coordinator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; finishing in-flight commits");
            stop.stop();
        }
    });

    let summary = coordinator.run(producers, config.ingestion.target).await?;
    let json = serde_json::to_string_pretty(&summary)?;
    println!("{}", json);

    if let Some(path) = &config.ingestion.report_path {
        tokio::fs::write(path, &json)
            .await
            .with_context(|| format!("writing report to {}", path))?;
        info!(path = %path, "Report written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_defaults_to_ingest() {
        assert_eq!(parse_command(None).unwrap(), Command::Ingest);
        assert_eq!(parse_command(Some("reconcile")).unwrap(), Command::Reconcile);
        assert_eq!(parse_command(Some("status")).unwrap(), Command::Status);
        assert!(parse_command(Some("serve")).is_err());
    }

    #[test]
    fn test_build_producers_requires_sources() {
        assert!(build_producers(&Config::default()).is_err());
    }

    #[test]
    fn test_build_producers_follows_config_order() {
        let config = Config::parse(
            r#"
            [[sources]]
            kind = "jsonl"
            name = "bulk"
            path = "bulk.jsonl"

            [[sources]]
            kind = "courtlistener"
            queries = ["habeas corpus"]
            "#,
        )
        .unwrap();
        let producers = build_producers(&config).unwrap();
        let names: Vec<&str> = producers.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["bulk", "courtlistener"]);
        assert!(producers[1].requires_credentials());
    }

    #[tokio::test]
    async fn test_memory_and_disabled_mirrors() {
        let memory = MirrorConfig { backend: MirrorBackend::Memory, ..Default::default() };
        assert!(open_mirror(&memory).await.unwrap().is_some());
        let none = MirrorConfig { backend: MirrorBackend::None, ..Default::default() };
        assert!(open_mirror(&none).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_combines_store_and_mirror_counts() {
        use lexvault_ingestion::StoreConfig;

        let dir = tempfile::TempDir::new().unwrap();
        let bucket = dir.path().join("2021-2022/contracts");
        std::fs::create_dir_all(&bucket).unwrap();
        for id in ["a", "b"] {
            let body = serde_json::json!({
                "id": id,
                "content": format!("opinion {}", id),
                "category": "contracts",
                "date_filed": "2021-03-01",
                "citation": null,
                "source": "bulk",
                "source_metadata": {},
                "content_hash": format!("h-{}", id),
                "quality_score": 0.8,
                "admitted_at": "2024-01-01T00:00:00Z",
                "bucket_path": "2021-2022/contracts",
            });
            std::fs::write(bucket.join(format!("{}.json", id)), body.to_string()).unwrap();
        }

        let store = BucketedStore::open(StoreConfig::new(dir.path())).await.unwrap();
        let mirror = MemoryMirror::new();
        reconcile(&mirror, &store).await.unwrap();

        let report = status(&store, Some(&mirror)).await.unwrap();
        assert!(report.store.valid);
        assert_eq!(report.store.total_files, 2);
        let counts = report.mirror.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.by_source["bulk"], 2);
        assert_eq!(counts.by_category["contracts"], 2);
        assert!(report.mirror_error.is_none());

        let bare = status(&store, None).await.unwrap();
        assert!(bare.mirror.is_none() && bare.mirror_error.is_none());
    }
}
