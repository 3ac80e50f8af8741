//! Configuration loading for the lexvault agent.
//! Reads lexvault.toml from the current directory or the path in LEXVAULT_CONFIG.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lexvault_ingestion::sources::CourtListenerConfig;
use lexvault_ingestion::store::{DateRange, DateRanges, StoreConfig};
use lexvault_ingestion::{BackoffPolicy, CoordinatorConfig, QualityConfig};
use secrecy::SecretString;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_root")]
    pub root: String,
    #[serde(default = "default_cap")]
    pub cap: usize,
    #[serde(default = "default_date_ranges")]
    pub date_ranges: Vec<DateRange>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            cap: default_cap(),
            date_ranges: default_date_ranges(),
        }
    }
}

fn default_store_root()  -> String { "./data/corpus".to_string() }
fn default_cap()         -> usize  { 999 }
fn default_date_ranges() -> Vec<DateRange> { DateRanges::default().ranges().to_vec() }

impl StoreSection {
    /// Validated store configuration. Cap is checked when the store opens.
    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        Ok(StoreConfig {
            root: PathBuf::from(&self.root),
            cap: self.cap,
            date_ranges: DateRanges::new(self.date_ranges.clone())?,
        })
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Environment variable holding comma-separated API tokens.
    #[serde(default = "default_tokens_env")]
    pub tokens_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { tokens_env: default_tokens_env() }
    }
}

fn default_tokens_env() -> String { "COURTLISTENER_API_KEYS".to_string() }

impl CredentialsConfig {
    /// Tokens from the configured variable; empty when it is unset.
    pub fn tokens(&self) -> Vec<SecretString> {
        std::env::var(&self.tokens_env)
            .map(|raw| parse_tokens(&raw))
            .unwrap_or_default()
    }
}

pub(crate) fn parse_tokens(raw: &str) -> Vec<SecretString> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base")]
    pub base_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_max")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base(),
            multiplier: default_backoff_multiplier(),
            max_secs: default_backoff_max(),
        }
    }
}

fn default_backoff_base()       -> u64 { 60 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_backoff_max()        -> u64 { 900 }

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(self.base_secs),
            multiplier: self.multiplier,
            max: Duration::from_secs(self.max_secs),
        }
    }
}

// ── Mirror ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorBackend {
    #[default]
    Lancedb,
    Memory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub backend: MirrorBackend,
    #[serde(default = "default_mirror_path")]
    pub path: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self { backend: MirrorBackend::default(), path: default_mirror_path() }
    }
}

fn default_mirror_path() -> String { "./data/mirror.lance".to_string() }

// ── Ingestion ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Documents to admit before the run stops.
    #[serde(default = "default_target")]
    pub target: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    pub max_run_secs: Option<u64>,
    #[serde(default = "default_max_upstream_failures")]
    pub max_consecutive_upstream_failures: u32,
    /// Where to write the JSON summary, in addition to stdout.
    pub report_path: Option<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            batch_size: default_batch_size(),
            cooldown_ms: default_cooldown_ms(),
            max_run_secs: None,
            max_consecutive_upstream_failures: default_max_upstream_failures(),
            report_path: None,
        }
    }
}

fn default_target()                -> usize { 1000 }
fn default_batch_size()            -> usize { 25 }
fn default_cooldown_ms()           -> u64   { 1000 }
fn default_max_upstream_failures() -> u32   { 5 }

impl IngestionConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            batch_size: self.batch_size,
            default_cooldown: Duration::from_millis(self.cooldown_ms),
            max_run_duration: self.max_run_secs.map(Duration::from_secs),
            max_consecutive_upstream_failures: self.max_consecutive_upstream_failures,
            ..CoordinatorConfig::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Hosts allowed in addition to the built-in allowlist.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

// ── Sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    CourtListener(CourtListenerConfig),
    Jsonl {
        name: Option<String>,
        path: String,
    },
}

mod tests;

impl Config {
    /// Load configuration from lexvault.toml.
    /// Checks LEXVAULT_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("LEXVAULT_CONFIG")
            .unwrap_or_else(|_| "lexvault.toml".to_string());

        if !Path::new(&path).exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy lexvault.example.toml to lexvault.toml and edit it.",
                path
            );
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
