//! Event persistence and the hand-off to the dispatcher.
//!
//! Writing is idempotent on `event_id`; only genuinely new events enter the
//! dispatch queue. The queue is bounded — when the dispatcher falls behind,
//! `EventWriter::write` blocks, which suspends the fetch loop instead of
//! dropping events.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::IndexerError;
use crate::types::{BlockRef, IndexedEvent};

/// Durable storage for indexed events, chain-scoped.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert the event if its `event_id` is unseen. Returns `true` for a
    /// new event, `false` for an idempotent no-op.
    async fn upsert(&self, event: &IndexedEvent) -> Result<bool, IndexerError>;

    /// Fetch a stored event by id. The dispatcher uses this to rebuild
    /// payloads for deliveries that survived a restart.
    async fn get(&self, event_id: &str) -> Result<Option<IndexedEvent>, IndexerError>;

    /// Delete unfinalized events above `block_number`. Finalized rows are
    /// never touched. Returns how many rows were removed.
    async fn delete_unfinalized_above(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<u64, IndexerError>;

    /// Mark all events at or below `block_number` as finalized.
    async fn finalize_up_to(&self, chain_id: &str, block_number: u64)
        -> Result<u64, IndexerError>;

    /// Whether any finalized event exists above `block_number`. Used by the
    /// reconciler to detect unrecoverable reorgs.
    async fn finalized_above_exists(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<bool, IndexerError>;

    /// The newest stored event at or below `block_number`, as a block
    /// reference. Anchors the fork-point scan.
    async fn newest_event_at_or_before(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<Option<BlockRef>, IndexerError>;
}

// ─── EventWriter ──────────────────────────────────────────────────────────────

/// Writes events through the store and enqueues new ones for dispatch.
pub struct EventWriter {
    store: std::sync::Arc<dyn EventStore>,
    queue: mpsc::Sender<IndexedEvent>,
}

impl EventWriter {
    /// `queue_depth` bounds the writer→dispatcher channel; the receiver half
    /// goes to the dispatcher intake.
    pub fn new(
        store: std::sync::Arc<dyn EventStore>,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<IndexedEvent>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        (Self { store, queue: tx }, rx)
    }

    /// Persist `event` and, if new, enqueue it for dispatch. Blocks while
    /// the queue is full. Returns whether the event was new.
    pub async fn write(&self, event: IndexedEvent) -> Result<bool, IndexerError> {
        let is_new = self.store.upsert(&event).await?;
        if !is_new {
            tracing::debug!(event_id = %event.event_id, "duplicate event, skipping dispatch");
            return Ok(false);
        }
        if self.queue.send(event).await.is_err() {
            // Dispatcher gone (shutdown in progress). The event is durably
            // stored; delivery can be recovered by a later backfill pass.
            tracing::warn!("dispatch queue closed, event persisted but not enqueued");
        }
        Ok(true)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory event store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<String, IndexedEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
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

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
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

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{event_id, EventPayload};
    use std::sync::Arc;

    fn ev(chain: &str, block: u64, log_index: u32, finalized: bool) -> IndexedEvent {
        let tx_hash = format!("0x{block:04x}{log_index:02x}");
        IndexedEvent {
            event_id: event_id(chain, &tx_hash, log_index),
            chain_id: chain.into(),
            address: "0x00000000000000000000000000000000000000aa".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_hash,
            log_index,
            payload: EventPayload::ProfileCreated {
                profile_id: block,
                owner: "0x1111111111111111111111111111111111111111".into(),
            },
            observed_at: 0,
            finalized,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryEventStore::new();
        let e = ev("base", 100, 0, false);

        assert!(store.upsert(&e).await.unwrap());
        assert!(!store.upsert(&e).await.unwrap());
        assert_eq!(store.len(), 1);
        // Second upsert left the stored state untouched.
        assert_eq!(store.events_for("base")[0], e);
    }

    #[tokio::test]
    async fn rollback_spares_finalized_rows() {
        let store = MemoryEventStore::new();
        store.upsert(&ev("base", 90, 0, true)).await.unwrap();
        store.upsert(&ev("base", 95, 0, false)).await.unwrap();
        store.upsert(&ev("base", 96, 0, false)).await.unwrap();

        let deleted = store.delete_unfinalized_above("base", 94).await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.events_for("base");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].block_number, 90);
    }

    #[tokio::test]
    async fn finalize_up_to_marks_rows() {
        let store = MemoryEventStore::new();
        store.upsert(&ev("base", 10, 0, false)).await.unwrap();
        store.upsert(&ev("base", 20, 0, false)).await.unwrap();

        assert_eq!(store.finalize_up_to("base", 15).await.unwrap(), 1);
        assert!(store.finalized_above_exists("base", 5).await.unwrap());
        assert!(!store.finalized_above_exists("base", 15).await.unwrap());
    }

    #[tokio::test]
    async fn newest_event_anchor() {
        let store = MemoryEventStore::new();
        store.upsert(&ev("base", 10, 0, false)).await.unwrap();
        store.upsert(&ev("base", 10, 3, false)).await.unwrap();
        store.upsert(&ev("base", 30, 0, false)).await.unwrap();

        let anchor = store
            .newest_event_at_or_before("base", 25)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(anchor.number, 10);

        assert!(store
            .newest_event_at_or_before("base", 5)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn writer_enqueues_only_new_events() {
        let store = Arc::new(MemoryEventStore::new());
        let (writer, mut rx) = EventWriter::new(store.clone(), 8);

        let e = ev("base", 100, 0, false);
        assert!(writer.write(e.clone()).await.unwrap());
        assert!(!writer.write(e.clone()).await.unwrap());

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.event_id, e.event_id);
        assert!(rx.try_recv().is_err(), "duplicate must not be enqueued");
    }

    #[tokio::test]
    async fn writer_blocks_when_queue_full() {
        let store = Arc::new(MemoryEventStore::new());
        let (writer, mut rx) = EventWriter::new(store, 1);

        writer.write(ev("base", 1, 0, false)).await.unwrap();

        // Queue is full — the next write must not complete until we drain.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            writer.write(ev("base", 2, 0, false)),
        )
        .await;
        assert!(pending.is_err(), "write should block on a full queue");

        rx.recv().await.unwrap();
        tokio::time::timeout(
            std::time::Duration::from_millis(200),
            writer.write(ev("base", 3, 0, false)),
        )
        .await
        .expect("write should resume after drain")
        .unwrap();
    }
}
