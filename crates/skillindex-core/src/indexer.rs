//! The per-chain indexing loop.
//!
//! Strictly sequential per chain: reorg-check → fetch window → persist →
//! checkpoint-advance → finalize. Multiple chains run as independent loops
//! sharing only the chain-scoped stores. Each tick processes at most one
//! window; the checkpoint is advanced only after every event in the window
//! is durably persisted (write-then-checkpoint, so a crash re-fetches
//! rather than loses).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::checkpoint::{ChainCheckpoint, CheckpointStore};
use crate::client::ChainClient;
use crate::decode::EventDecoder;
use crate::error::IndexerError;
use crate::fetcher::LogFetcher;
use crate::metrics::PipelineMetrics;
use crate::reorg::Reconciler;
use crate::types::IndexedEvent;
use crate::writer::{EventStore, EventWriter};

/// Configuration for one chain's indexing loop.
///
/// The documented defaults are starting points, not business rules — every
/// threshold is expected to be tuned per chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainIndexerConfig {
    /// Chain slug (e.g. `"base"`); checkpoint and event rows key off this.
    pub chain_id: String,
    /// Contract addresses of interest.
    pub contracts: Vec<String>,
    /// Block to seed the checkpoint from on first run.
    pub start_block: u64,
    /// Blocks behind head before logs are indexed.
    pub confirmation_depth: u64,
    /// Additional confirmations beyond `confirmation_depth` before events
    /// become immutable.
    pub finalization_depth: u64,
    /// Largest block span per `get_logs` window.
    pub max_window: u64,
    /// Backward stride of the fork-point scan.
    pub reorg_scan_step: u64,
    /// Reorgs deeper than this halt the chain.
    pub max_reorg_depth: u64,
    /// Pause between ticks.
    pub poll_interval_ms: u64,
    /// Bound of the writer→dispatcher queue (backpressure threshold).
    pub queue_depth: usize,
}

impl Default for ChainIndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: "ethereum".into(),
            contracts: vec![],
            start_block: 0,
            confirmation_depth: 6,
            finalization_depth: 64,
            max_window: 2_000,
            reorg_scan_step: 50,
            max_reorg_depth: 200,
            poll_interval_ms: 2_000,
            queue_depth: 1_024,
        }
    }
}

/// Fluent builder for [`ChainIndexerConfig`].
#[derive(Default)]
pub struct ChainIndexerBuilder {
    config: ChainIndexerConfig,
}

impl ChainIndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.config.chain_id = chain_id.into();
        self
    }

    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contracts.push(address.into());
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn finalization_depth(mut self, depth: u64) -> Self {
        self.config.finalization_depth = depth;
        self
    }

    pub fn max_window(mut self, blocks: u64) -> Self {
        self.config.max_window = blocks;
        self
    }

    pub fn reorg_scan_step(mut self, blocks: u64) -> Self {
        self.config.reorg_scan_step = blocks;
        self
    }

    pub fn max_reorg_depth(mut self, blocks: u64) -> Self {
        self.config.max_reorg_depth = blocks;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    pub fn build_config(self) -> ChainIndexerConfig {
        self.config
    }
}

/// One chain's indexing loop.
pub struct ChainIndexer {
    config: ChainIndexerConfig,
    client: Arc<dyn ChainClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    fetcher: LogFetcher,
    reconciler: Reconciler,
    writer: EventWriter,
    metrics: Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl ChainIndexer {
    /// Wire up a loop. The returned receiver is the dispatcher's intake of
    /// newly indexed events.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ChainIndexerConfig,
        client: Arc<dyn ChainClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
        decoder: Arc<dyn EventDecoder>,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, mpsc::Receiver<IndexedEvent>) {
        let fetcher = LogFetcher::new(
            decoder,
            config.contracts.clone(),
            config.confirmation_depth,
            config.max_window,
        );
        let reconciler = Reconciler::new(
            config.reorg_scan_step,
            config.max_reorg_depth,
            config.start_block,
        );
        let (writer, rx) = EventWriter::new(events.clone(), config.queue_depth);
        (
            Self {
                config,
                client,
                checkpoints,
                events,
                fetcher,
                reconciler,
                writer,
                metrics,
                shutdown,
            },
            rx,
        )
    }

    /// Run until shutdown or a fatal error.
    ///
    /// Transient and protocol errors pause for a tick and retry; fatal ones
    /// (deep reorg, checkpoint conflict) halt this chain only.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        tracing::info!(chain_id = %self.config.chain_id, "indexer loop starting");
        loop {
            if *self.shutdown.borrow() {
                tracing::info!(chain_id = %self.config.chain_id, "indexer loop stopping");
                return Ok(());
            }

            match self.tick().await {
                Ok(advanced) => {
                    // Keep draining without pause while there is a backlog.
                    if advanced {
                        continue;
                    }
                }
                Err(e) if e.is_fatal() => {
                    self.metrics.record_halt(&self.config.chain_id);
                    tracing::error!(
                        chain_id = %self.config.chain_id,
                        error = %e,
                        "indexer halted — operator intervention required"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        chain_id = %self.config.chain_id,
                        error = %e,
                        transient = e.is_transient(),
                        "tick failed, retrying next tick"
                    );
                }
            }

            let pause = Duration::from_millis(self.config.poll_interval_ms);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.shutdown.changed() => {}
            }
        }
    }

    /// One pass: verify the checkpoint, process at most one window.
    /// Returns `true` if the checkpoint advanced (more backlog may remain).
    async fn tick(&self) -> Result<bool, IndexerError> {
        let chain_id = self.config.chain_id.clone();
        let checkpoint = match self.checkpoints.load(&chain_id).await? {
            Some(cp) => cp,
            None => self.seed_checkpoint().await?,
        };

        let height = self.client.current_height().await?;
        self.metrics
            .set_block_lag(&chain_id, height.saturating_sub(checkpoint.block_number));

        // Reorg gate: the stored hash must still be canonical before we
        // fetch anything above it.
        if !self
            .reconciler
            .checkpoint_is_canonical(self.client.as_ref(), &checkpoint)
            .await?
        {
            let reorg = self
                .reconciler
                .reconcile(
                    self.client.as_ref(),
                    self.events.as_ref(),
                    self.checkpoints.as_ref(),
                    &checkpoint,
                )
                .await?;
            self.metrics.record_reorg(&chain_id, reorg.depth);
            // Re-fetch resumes from the rewound checkpoint next pass.
            return Ok(true);
        }

        let target = self.fetcher.confirmed_target(height);
        let Some((from, to)) = self.fetcher.next_window(checkpoint.block_number, target) else {
            return Ok(false);
        };

        // Capture the window-end hash before fetching logs. If a reorg races
        // the window, the hash we checkpoint is stale and the next tick's
        // canonical check catches it, rolling the window back.
        let Some(end_hash) = self.client.block_hash_at(to).await? else {
            tracing::warn!(chain_id = %chain_id, to, "window end vanished, deferring");
            return Ok(false);
        };

        let events = self
            .fetcher
            .fetch_window(self.client.as_ref(), &chain_id, from, to)
            .await?;

        let mut new_events = 0u64;
        let mut duplicates = 0u64;
        for event in events {
            if self.writer.write(event).await? {
                new_events += 1;
            } else {
                duplicates += 1;
            }
        }
        self.metrics.add_events_indexed(new_events);
        self.metrics.add_events_duplicate(duplicates);

        self.checkpoints
            .save_if_unchanged(
                Some(&checkpoint.block_hash),
                ChainCheckpoint::new(chain_id.clone(), to, end_hash),
            )
            .await?;

        // Finalize everything that is now beyond the rewrite window.
        let finalize_up_to = target.saturating_sub(self.config.finalization_depth);
        if finalize_up_to > 0 {
            self.events.finalize_up_to(&chain_id, finalize_up_to).await?;
        }

        tracing::info!(
            chain_id = %chain_id,
            from,
            to,
            new_events,
            duplicates,
            "window committed"
        );
        Ok(true)
    }

    /// First run: anchor the checkpoint at the configured start block.
    async fn seed_checkpoint(&self) -> Result<ChainCheckpoint, IndexerError> {
        let start = self.config.start_block;
        let hash = self.client.block_hash_at(start).await?.ok_or_else(|| {
            IndexerError::ChainProtocol(format!("no canonical block at start block {start}"))
        })?;
        let checkpoint = ChainCheckpoint::new(self.config.chain_id.clone(), start, hash);
        self.checkpoints
            .save_if_unchanged(None, checkpoint.clone())
            .await?;
        tracing::info!(
            chain_id = %self.config.chain_id,
            start,
            "seeded checkpoint at start block"
        );
        Ok(checkpoint)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
