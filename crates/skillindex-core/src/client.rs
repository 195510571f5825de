//! Chain client abstraction.
//!
//! The indexer sees the chain through this narrow interface; the concrete
//! JSON-RPC implementation (with retry/backoff) lives in `skillindex-rpc`.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::RawLog;

/// Read access to a chain's canonical state.
///
/// Implementations own transient-error retries: by the time a call returns
/// `ChainUnavailable` the retry budget is already spent. Protocol errors
/// (`ChainProtocol`) are surfaced immediately, never retried.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn current_height(&self) -> Result<u64, IndexerError>;

    /// All logs emitted by `addresses` in `[from, to]` (inclusive).
    async fn get_logs(
        &self,
        addresses: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError>;

    /// Canonical hash at `number`, or `None` if the node no longer has a
    /// block there (e.g. past the head after a reorg shrank the chain).
    async fn block_hash_at(&self, number: u64) -> Result<Option<String>, IndexerError>;
}
