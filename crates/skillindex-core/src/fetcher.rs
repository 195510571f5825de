//! Log fetching — bounded windows behind a confirmation depth.

use std::sync::Arc;

use crate::client::ChainClient;
use crate::decode::EventDecoder;
use crate::error::IndexerError;
use crate::types::{event_id, IndexedEvent, RawLog};

/// Pulls new logs in bounded windows and normalizes them into events.
pub struct LogFetcher {
    decoder: Arc<dyn EventDecoder>,
    /// Contract addresses of interest.
    contracts: Vec<String>,
    /// Blocks behind head before a block's logs are indexed.
    confirmation_depth: u64,
    /// Largest `[from, to]` span per `get_logs` call.
    max_window: u64,
}

impl LogFetcher {
    pub fn new(
        decoder: Arc<dyn EventDecoder>,
        contracts: Vec<String>,
        confirmation_depth: u64,
        max_window: u64,
    ) -> Self {
        Self {
            decoder,
            contracts,
            confirmation_depth,
            max_window,
        }
    }

    /// The highest block we are willing to index at the given head height.
    pub fn confirmed_target(&self, head: u64) -> u64 {
        head.saturating_sub(self.confirmation_depth)
    }

    /// Next window `[from, to]` to fetch, or `None` if we are caught up.
    pub fn next_window(&self, last_synced: u64, target: u64) -> Option<(u64, u64)> {
        if target <= last_synced {
            return None;
        }
        let from = last_synced + 1;
        let to = target.min(last_synced.saturating_add(self.max_window));
        Some((from, to))
    }

    /// Fetch and normalize all events in `[from, to]`, ordered by
    /// `(block_number, log_index)`.
    pub async fn fetch_window(
        &self,
        client: &dyn ChainClient,
        chain_id: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<IndexedEvent>, IndexerError> {
        let logs = client.get_logs(&self.contracts, from, to).await?;
        let mut events = self.normalize(chain_id, logs);
        events.sort_by(|a, b| {
            (a.block_number, a.log_index).cmp(&(b.block_number, b.log_index))
        });
        tracing::debug!(chain_id, from, to, events = events.len(), "window fetched");
        Ok(events)
    }

    /// Decode raw logs; unknown signatures and reorg-removed logs are
    /// skipped, decode failures on known signatures are logged and skipped.
    fn normalize(&self, chain_id: &str, logs: Vec<RawLog>) -> Vec<IndexedEvent> {
        let observed_at = chrono::Utc::now().timestamp();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if log.is_removed() {
                continue;
            }
            let payload = match self.decoder.decode(&log) {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    tracing::debug!(
                        topic0 = log.signature_topic().unwrap_or(""),
                        tx = %log.tx_hash,
                        "unknown event signature, skipping"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        tx = %log.tx_hash,
                        error = %e,
                        "failed to decode known event, skipping"
                    );
                    continue;
                }
            };
            let log_index = log.log_index_u32();
            events.push(IndexedEvent {
                event_id: event_id(chain_id, &log.tx_hash, log_index),
                chain_id: chain_id.to_string(),
                address: log.address.to_ascii_lowercase(),
                block_number: log.block_number_u64(),
                block_hash: log.block_hash.clone(),
                tx_hash: log.tx_hash.clone(),
                log_index,
                payload,
                observed_at,
                finalized: false,
            });
        }
        events
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
