//! Deployment configuration — a single JSON file describing the chains to
//! index, the dispatcher, storage, and logging.

use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use skillindex_core::{ChainIndexerConfig, RetryConfig};
use skillindex_webhook::DispatcherConfig;

/// Top-level config file.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LogConfig,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

impl AppConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {path}: {e}"))?;
        let config: AppConfig = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("cannot parse config {path}: {e}"))?;
        if config.chains.is_empty() {
            anyhow::bail!("config has no chains");
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./skillindex.db".into(),
        }
    }
}

/// One chain to index: its RPC endpoint plus the indexer tuning knobs.
#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    #[serde(flatten)]
    pub indexer: ChainIndexerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Initialise tracing. Should be called once at startup; `RUST_LOG`
/// overrides the configured level.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Dispatcher knobs as they appear in the config file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub claim_batch: u32,
    pub claim_lease_ms: i64,
    pub poll_interval_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 16,
            max_attempts: 8,
            request_timeout_secs: 10,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 600_000,
            claim_batch: 32,
            claim_lease_ms: 30_000,
            poll_interval_ms: 500,
        }
    }
}

impl DispatcherSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            max_attempts: self.max_attempts,
            backoff: RetryConfig {
                max_attempts: self.max_attempts,
                base: Duration::from_millis(self.backoff_base_ms),
                cap: Duration::from_millis(self.backoff_cap_ms),
                multiplier: 2.0,
                jitter_fraction: 0.2,
            },
            claim_batch: self.claim_batch,
            claim_lease_ms: self.claim_lease_ms,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}
