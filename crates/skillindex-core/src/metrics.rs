//! Pipeline metrics — consumed by the external monitoring collaborator.
//!
//! A process-wide registry of atomic counters and per-chain gauges with a
//! serializable snapshot. Fatal conditions additionally emit `tracing`
//! alerts at the call sites; this module only counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Per-chain gauge values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChainStats {
    /// Blocks between the chain head and the checkpoint.
    pub block_lag: u64,
    /// Reorgs reconciled since start.
    pub reorg_count: u64,
    /// Depth of the most recent reorg.
    pub last_reorg_depth: u64,
    /// Set when the loop halted on a fatal condition.
    pub halted: bool,
}

/// Shared metrics registry. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct PipelineMetrics {
    chains: Mutex<HashMap<String, ChainStats>>,
    events_indexed: AtomicU64,
    events_duplicate: AtomicU64,
    queue_depth: AtomicU64,
    deliveries_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    deliveries_dead_lettered: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_block_lag(&self, chain_id: &str, lag: u64) {
        self.chains
            .lock()
            .unwrap()
            .entry(chain_id.to_string())
            .or_default()
            .block_lag = lag;
    }

    pub fn record_reorg(&self, chain_id: &str, depth: u64) {
        let mut chains = self.chains.lock().unwrap();
        let stats = chains.entry(chain_id.to_string()).or_default();
        stats.reorg_count += 1;
        stats.last_reorg_depth = depth;
    }

    pub fn record_halt(&self, chain_id: &str) {
        self.chains
            .lock()
            .unwrap()
            .entry(chain_id.to_string())
            .or_default()
            .halted = true;
    }

    pub fn add_events_indexed(&self, n: u64) {
        self.events_indexed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_events_duplicate(&self, n: u64) {
        self.events_duplicate.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.deliveries_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.deliveries_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let delivered = self.deliveries_delivered.load(Ordering::Relaxed);
        let failures = self.delivery_failures.load(Ordering::Relaxed);
        let attempts = delivered + failures;
        MetricsSnapshot {
            chains: self
                .chains
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            events_indexed: self.events_indexed.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            deliveries_delivered: delivered,
            delivery_failures: failures,
            deliveries_dead_lettered: self.deliveries_dead_lettered.load(Ordering::Relaxed),
            delivery_success_rate: if attempts == 0 {
                1.0
            } else {
                delivered as f64 / attempts as f64
            },
        }
    }
}

/// Point-in-time view of the registry, serializable for the monitoring
/// collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub chains: BTreeMap<String, ChainStats>,
    pub events_indexed: u64,
    pub events_duplicate: u64,
    pub queue_depth: u64,
    pub deliveries_delivered: u64,
    pub delivery_failures: u64,
    pub deliveries_dead_lettered: u64,
    pub delivery_success_rate: f64,
}
