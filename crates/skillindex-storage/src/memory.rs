//! In-memory storage backend.
//!
//! Implements every store trait of the pipeline in RAM. Useful for tests
//! and short-lived runs; all data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use skillindex_core::checkpoint::{ChainCheckpoint, CheckpointStore};
use skillindex_core::types::{BlockRef, EventKind, IndexedEvent};
use skillindex_core::writer::EventStore;
use skillindex_core::IndexerError;
use skillindex_webhook::subscription::{
    DeliveryStatus, DeliveryStore, SubscriptionStore, WebhookDelivery, WebhookSubscription,
};

#[derive(Default)]
struct DeliveryState {
    next_id: i64,
    sequences: HashMap<String, u64>,
    rows: Vec<WebhookDelivery>,
}

/// All pipeline state in RAM.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, ChainCheckpoint>>,
    events: Mutex<HashMap<String, IndexedEvent>>,
    subscriptions: Mutex<HashMap<String, WebhookSubscription>>,
    deliveries: Mutex<DeliveryState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a subscription. The registration API owns subscriptions in
    /// production; this helper exists for tests and local tooling.
    pub fn put_subscription(&self, subscription: WebhookSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.subscription_id.clone(), subscription);
    }

    /// All events for a chain, ordered by `(block_number, log_index)`.
    pub fn events_for(&self, chain_id: &str) -> Vec<IndexedEvent> {
        let mut events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.chain_id == chain_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        events
    }

    /// Every delivery row, in creation order.
    pub fn delivery_rows(&self) -> Vec<WebhookDelivery> {
        self.deliveries.lock().unwrap().rows.clone()
    }
}

// ─── CheckpointStore ──────────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, chain_id: &str) -> Result<Option<ChainCheckpoint>, IndexerError> {
        Ok(self.checkpoints.lock().unwrap().get(chain_id).cloned())
    }

    async fn save(&self, checkpoint: ChainCheckpoint) -> Result<(), IndexerError> {
        self.checkpoints
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
        let mut checkpoints = self.checkpoints.lock().unwrap();
        let stored = checkpoints
            .get(&checkpoint.chain_id)
            .map(|c| c.block_hash.clone());
        match (stored.as_deref(), expected_prev_hash) {
            (None, None) => {}
            (Some(actual), Some(expected)) if actual == expected => {}
            _ => {
                return Err(IndexerError::CheckpointConflict {
                    chain_id: checkpoint.chain_id.clone(),
                })
            }
        }
        checkpoints.insert(checkpoint.chain_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str) -> Result<(), IndexerError> {
        self.checkpoints.lock().unwrap().remove(chain_id);
        Ok(())
    }
}

// ─── EventStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn upsert(&self, event: &IndexedEvent) -> Result<bool, IndexerError> {
        let mut events = self.events.lock().unwrap();
        if events.contains_key(&event.event_id) {
            return Ok(false);
        }
        events.insert(event.event_id.clone(), event.clone());
        Ok(true)
    }

    async fn get(&self, event_id: &str) -> Result<Option<IndexedEvent>, IndexerError> {
        Ok(self.events.lock().unwrap().get(event_id).cloned())
    }

    async fn delete_unfinalized_above(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<u64, IndexerError> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|_, e| {
            e.chain_id != chain_id || e.finalized || e.block_number <= block_number
        });
        Ok((before - events.len()) as u64)
    }

    async fn finalize_up_to(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<u64, IndexerError> {
        let mut events = self.events.lock().unwrap();
        let mut changed = 0;
        for e in events.values_mut() {
            if e.chain_id == chain_id && !e.finalized && e.block_number <= block_number {
                e.finalized = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn finalized_above_exists(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<bool, IndexerError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .any(|e| e.chain_id == chain_id && e.finalized && e.block_number > block_number))
    }

    async fn newest_event_at_or_before(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<Option<BlockRef>, IndexerError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.chain_id == chain_id && e.block_number <= block_number)
            .max_by_key(|e| (e.block_number, e.log_index))
            .map(|e| BlockRef::new(e.block_number, e.block_hash.clone())))
    }
}

// ─── SubscriptionStore ────────────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for InMemoryStorage {
    async fn active_subscriptions_for(
        &self,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, IndexerError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.wants(kind))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, IndexerError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned())
    }
}

// ─── DeliveryStore ────────────────────────────────────────────────────────────

#[async_trait]
impl DeliveryStore for InMemoryStorage {
    async fn create(
        &self,
        subscription_id: &str,
        event_id: &str,
    ) -> Result<WebhookDelivery, IndexerError> {
        let mut state = self.deliveries.lock().unwrap();
        state.next_id += 1;
        let next_id = state.next_id;
        let sequence = *state
            .sequences
            .entry(subscription_id.to_string())
            .and_modify(|s| *s += 1)
            .or_insert(1);
        let delivery = WebhookDelivery {
            delivery_id: next_id,
            subscription_id: subscription_id.to_string(),
            event_id: event_id.to_string(),
            sequence,
            attempt_count: 0,
            status: DeliveryStatus::Pending,
            last_response_code: None,
            next_attempt_at: chrono::Utc::now().timestamp_millis(),
        };
        state.rows.push(delivery.clone());
        Ok(delivery)
    }

    async fn claim_due(
        &self,
        now_ms: i64,
        limit: u32,
        lease_ms: i64,
    ) -> Result<Vec<WebhookDelivery>, IndexerError> {
        let mut state = self.deliveries.lock().unwrap();
        let mut claimed = Vec::new();
        for row in state.rows.iter_mut() {
            if claimed.len() as u32 >= limit {
                break;
            }
            if !row.status.is_terminal() && row.next_attempt_at <= now_ms {
                row.next_attempt_at = now_ms + lease_ms;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(
        &self,
        delivery_id: i64,
        response_code: u16,
    ) -> Result<(), IndexerError> {
        self.update_delivery(delivery_id, |row| {
            row.attempt_count += 1;
            row.status = DeliveryStatus::Delivered;
            row.last_response_code = Some(response_code);
        })
    }

    async fn mark_retrying(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
        next_attempt_at: i64,
    ) -> Result<(), IndexerError> {
        self.update_delivery(delivery_id, |row| {
            row.attempt_count = attempt_count;
            row.status = DeliveryStatus::Retrying;
            row.last_response_code = response_code;
            row.next_attempt_at = next_attempt_at;
        })
    }

    async fn mark_dead_lettered(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
    ) -> Result<(), IndexerError> {
        self.update_delivery(delivery_id, |row| {
            row.attempt_count = attempt_count;
            row.status = DeliveryStatus::DeadLettered;
            row.last_response_code = response_code;
        })
    }
}

impl InMemoryStorage {
    fn update_delivery(
        &self,
        delivery_id: i64,
        apply: impl FnOnce(&mut WebhookDelivery),
    ) -> Result<(), IndexerError> {
        let mut state = self.deliveries.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.delivery_id == delivery_id)
            .ok_or_else(|| IndexerError::Storage(format!("unknown delivery {delivery_id}")))?;
        apply(row);
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
