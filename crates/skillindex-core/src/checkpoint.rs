//! Checkpoint store — the only durable record of per-chain indexing progress.
//!
//! A checkpoint stores the last fully-processed block number and its hash.
//! On restart the indexer resumes from it; on a reorg the reconciler rewinds
//! it. One row per chain, mutated only by that chain's indexer loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// The persisted cursor for one chain.
///
/// Invariant: `block_hash` equals the canonical hash observed at
/// `block_number` at the time of the last successful advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    /// Chain slug (e.g. `"base"`).
    pub chain_id: String,
    /// Last fully-processed block number.
    pub block_number: u64,
    /// Canonical hash at `block_number` as last observed.
    pub block_hash: String,
    /// Unix timestamp of the last save.
    pub updated_at: i64,
}

impl ChainCheckpoint {
    pub fn new(chain_id: impl Into<String>, block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            block_number,
            block_hash: block_hash.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for storing and loading checkpoints.
///
/// The deployment guarantees a single writer per chain via an external
/// lease; `save_if_unchanged` is the belt-and-braces primitive that makes
/// an accidental second writer fail loudly instead of corrupting state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a chain. `None` on first run — the caller
    /// seeds from its configured start block.
    async fn load(&self, chain_id: &str) -> Result<Option<ChainCheckpoint>, IndexerError>;

    /// Unconditionally save (upsert) a checkpoint.
    async fn save(&self, checkpoint: ChainCheckpoint) -> Result<(), IndexerError>;

    /// Compare-and-swap save: succeeds only if the stored hash still equals
    /// `expected_prev_hash` (`None` = no row may exist yet). Returns
    /// [`IndexerError::CheckpointConflict`] if the guard fails.
    async fn save_if_unchanged(
        &self,
        expected_prev_hash: Option<&str>,
        checkpoint: ChainCheckpoint,
    ) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting a chain).
    async fn delete(&self, chain_id: &str) -> Result<(), IndexerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, ChainCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, chain_id: &str) -> Result<Option<ChainCheckpoint>, IndexerError> {
        Ok(self.data.lock().unwrap().get(chain_id).cloned())
    }

    async fn save(&self, checkpoint: ChainCheckpoint) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .insert(checkpoint.chain_id.clone(), checkpoint);
        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        expected_prev_hash: Option<&str>,
        checkpoint: ChainCheckpoint,
    ) -> Result<(), IndexerError> {
        let mut data = self.data.lock().unwrap();
        let stored = data.get(&checkpoint.chain_id).map(|c| c.block_hash.clone());
        match (stored.as_deref(), expected_prev_hash) {
            (None, None) => {}
            (Some(actual), Some(expected)) if actual == expected => {}
            _ => {
                return Err(IndexerError::CheckpointConflict {
                    chain_id: checkpoint.chain_id.clone(),
                })
            }
        }
        data.insert(checkpoint.chain_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str) -> Result<(), IndexerError> {
        self.data.lock().unwrap().remove(chain_id);
        Ok(())
    }
}
