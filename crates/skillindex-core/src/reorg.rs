//! Reorg detection and reconciliation.
//!
//! Before each window the loop re-reads the canonical hash at the
//! checkpoint; a mismatch means previously observed history was replaced.
//! Reconciliation walks backward to the newest stored event whose hash is
//! still canonical (the fork point), deletes everything unfinalized above
//! it, and rewinds the checkpoint. Reorgs that would touch finalized events
//! or exceed the configured depth halt the chain instead of rewriting
//! history.

use crate::checkpoint::{ChainCheckpoint, CheckpointStore};
use crate::client::ChainClient;
use crate::error::IndexerError;
use crate::types::BlockRef;
use crate::writer::EventStore;

/// Describes a reconciled chain reorganization.
#[derive(Debug, Clone)]
pub struct ReorgEvent {
    pub chain_id: String,
    /// Checkpoint block at which the mismatch was detected.
    pub detected_at: u64,
    /// Last block whose stored hash is still canonical.
    pub fork_point: BlockRef,
    /// Blocks rolled back (`detected_at - fork_point.number`).
    pub depth: u64,
    /// Unfinalized events deleted during reconciliation.
    pub events_dropped: u64,
}

/// Walks back to the fork point and repairs storage after a reorg.
pub struct Reconciler {
    /// Backward scan stride while searching for the fork point.
    scan_step: u64,
    /// Rewinds deeper than this are treated as unrecoverable.
    max_reorg_depth: u64,
    /// Floor of the scan; also the rewind target when no stored event
    /// anchors the fork (first-run seed semantics).
    start_block: u64,
}

impl Reconciler {
    pub fn new(scan_step: u64, max_reorg_depth: u64, start_block: u64) -> Self {
        Self {
            scan_step: scan_step.max(1),
            max_reorg_depth,
            start_block,
        }
    }

    /// Returns `true` if the stored checkpoint still matches the chain.
    pub async fn checkpoint_is_canonical(
        &self,
        client: &dyn ChainClient,
        checkpoint: &ChainCheckpoint,
    ) -> Result<bool, IndexerError> {
        let canonical = client.block_hash_at(checkpoint.block_number).await?;
        Ok(canonical.as_deref() == Some(checkpoint.block_hash.as_str()))
    }

    /// Locate the newest stored block reference that is still canonical.
    async fn find_fork_point(
        &self,
        client: &dyn ChainClient,
        events: &dyn EventStore,
        checkpoint: &ChainCheckpoint,
    ) -> Result<BlockRef, IndexerError> {
        let mut candidate = checkpoint.block_number;
        loop {
            if candidate <= self.start_block {
                return self.seed_ref(client).await;
            }
            let anchor = events
                .newest_event_at_or_before(&checkpoint.chain_id, candidate)
                .await?;
            let Some(anchor) = anchor else {
                // Nothing stored at or below here — rewind to the seed.
                return self.seed_ref(client).await;
            };
            match client.block_hash_at(anchor.number).await? {
                Some(canonical) if canonical == anchor.hash => return Ok(anchor),
                _ => {
                    if anchor.number <= self.start_block {
                        return self.seed_ref(client).await;
                    }
                    candidate = anchor.number.saturating_sub(self.scan_step);
                }
            }
        }
    }

    async fn seed_ref(&self, client: &dyn ChainClient) -> Result<BlockRef, IndexerError> {
        let hash = client
            .block_hash_at(self.start_block)
            .await?
            .ok_or_else(|| {
                IndexerError::ChainProtocol(format!(
                    "no canonical block at configured start block {}",
                    self.start_block
                ))
            })?;
        Ok(BlockRef::new(self.start_block, hash))
    }

    /// Repair storage and rewind the checkpoint after a detected reorg.
    ///
    /// Errors with [`IndexerError::DeepReorg`] — without touching any data —
    /// when the rewind would cross a finalized event or exceed
    /// `max_reorg_depth`.
    pub async fn reconcile(
        &self,
        client: &dyn ChainClient,
        events: &dyn EventStore,
        checkpoints: &dyn CheckpointStore,
        checkpoint: &ChainCheckpoint,
    ) -> Result<ReorgEvent, IndexerError> {
        let fork_point = self.find_fork_point(client, events, checkpoint).await?;
        let depth = checkpoint.block_number.saturating_sub(fork_point.number);

        if depth > self.max_reorg_depth
            || events
                .finalized_above_exists(&checkpoint.chain_id, fork_point.number)
                .await?
        {
            return Err(IndexerError::DeepReorg {
                chain_id: checkpoint.chain_id.clone(),
                fork_block: fork_point.number,
                depth,
            });
        }

        let events_dropped = events
            .delete_unfinalized_above(&checkpoint.chain_id, fork_point.number)
            .await?;

        let rewound = ChainCheckpoint::new(
            checkpoint.chain_id.clone(),
            fork_point.number,
            fork_point.hash.clone(),
        );
        checkpoints
            .save_if_unchanged(Some(&checkpoint.block_hash), rewound)
            .await?;

        tracing::warn!(
            chain_id = %checkpoint.chain_id,
            detected_at = checkpoint.block_number,
            fork_block = fork_point.number,
            depth,
            events_dropped,
            "reorg reconciled"
        );

        Ok(ReorgEvent {
            chain_id: checkpoint.chain_id.clone(),
            detected_at: checkpoint.block_number,
            fork_point,
            depth,
            events_dropped,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
