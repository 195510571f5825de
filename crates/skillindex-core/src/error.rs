//! Error taxonomy for the indexing and delivery pipeline.

use thiserror::Error;

/// Errors that can occur while indexing a chain or persisting its events.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// The RPC endpoint is unreachable after the retry budget was spent.
    /// Transient — the loop backs off and tries again next tick.
    #[error("chain unavailable: {reason}")]
    ChainUnavailable { reason: String },

    /// The node returned a response we could not interpret (malformed JSON,
    /// unexpected shape, JSON-RPC error object). Never retried blindly.
    #[error("chain protocol error: {0}")]
    ChainProtocol(String),

    /// A reorganization reaches past the safe rewrite window — either it
    /// would invalidate finalized events or it exceeds the configured
    /// maximum depth. The chain loop halts and operators must intervene.
    #[error("deep reorg on {chain_id}: fork below block {fork_block}, depth {depth}")]
    DeepReorg {
        chain_id: String,
        fork_block: u64,
        depth: u64,
    },

    /// A compare-and-swap checkpoint write lost the race. Only possible when
    /// two indexer instances share a chain_id, which the deployment must
    /// prevent — failing loudly here beats silent corruption.
    #[error("checkpoint conflict for {chain_id}: stored hash no longer matches")]
    CheckpointConflict { chain_id: String },

    /// A log that matched a known signature could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Underlying persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The loop was asked to stop and did.
    #[error("indexer halted: {reason}")]
    Halted { reason: String },
}

impl IndexerError {
    /// Returns `true` if the caller should back off and retry next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }

    /// Returns `true` if the chain loop must stop and page an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeepReorg { .. } | Self::CheckpointConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_vs_fatal() {
        let unavailable = IndexerError::ChainUnavailable {
            reason: "connection refused".into(),
        };
        assert!(unavailable.is_transient());
        assert!(!unavailable.is_fatal());

        let deep = IndexerError::DeepReorg {
            chain_id: "base".into(),
            fork_block: 100,
            depth: 250,
        };
        assert!(deep.is_fatal());
        assert!(!deep.is_transient());
    }

    #[test]
    fn protocol_error_not_transient() {
        let e = IndexerError::ChainProtocol("unexpected result shape".into());
        assert!(!e.is_transient());
        assert!(!e.is_fatal());
    }
}
