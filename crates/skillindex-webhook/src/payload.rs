//! Webhook wire format.
//!
//! The signature covers the exact serialized bytes, so serialization must
//! be canonical: struct field order is the wire order, and the body is
//! produced exactly once per attempt and signed as-is.

use serde::{Deserialize, Serialize};

use skillindex_core::{EventKind, IndexedEvent, IndexerError};

/// The POST body sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event_id: String,
    pub event_type: EventKind,
    pub chain_id: String,
    pub block_number: u64,
    pub tx_hash: String,
    /// Decoded event fields, without the redundant type tag.
    pub payload: serde_json::Value,
    /// Per-subscription delivery sequence — receivers detect gaps and
    /// reordering with it, and dedupe on `event_id` + `sequence`.
    pub sequence: u64,
}

impl WebhookPayload {
    pub fn from_event(event: &IndexedEvent, sequence: u64) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_type: event.kind(),
            chain_id: event.chain_id.clone(),
            block_number: event.block_number,
            tx_hash: event.tx_hash.clone(),
            payload: event.payload.fields_json(),
            sequence,
        }
    }

    /// The canonical bytes that go on the wire and under the HMAC.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        serde_json::to_vec(self).map_err(|e| IndexerError::Storage(e.to_string()))
    }
}
