//! SQLite storage backend.
//!
//! Persists checkpoints, events, subscriptions, and the delivery queue in a
//! single SQLite file. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! # Usage
//! ```rust,no_run
//! use skillindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./skillindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use skillindex_core::checkpoint::{ChainCheckpoint, CheckpointStore};
use skillindex_core::types::{BlockRef, EventKind, EventPayload, IndexedEvent};
use skillindex_core::writer::EventStore;
use skillindex_core::IndexerError;
use skillindex_webhook::subscription::{
    DeliveryStatus, DeliveryStore, SubscriptionStore, WebhookDelivery, WebhookSubscription,
};

fn storage_err(e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for the whole pipeline.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database. All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                event_id     TEXT    PRIMARY KEY,
                chain_id     TEXT    NOT NULL,
                address      TEXT    NOT NULL,
                event_type   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                payload      TEXT    NOT NULL,
                observed_at  INTEGER NOT NULL,
                finalized    INTEGER NOT NULL DEFAULT 0
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_chain_block
             ON events (chain_id, block_number, log_index);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_id TEXT    PRIMARY KEY,
                url             TEXT    NOT NULL,
                secret          TEXT    NOT NULL,
                event_types     TEXT    NOT NULL,
                active          INTEGER NOT NULL DEFAULT 1
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS deliveries (
                delivery_id        INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id    TEXT    NOT NULL,
                event_id           TEXT    NOT NULL,
                sequence           INTEGER NOT NULL,
                attempt_count      INTEGER NOT NULL DEFAULT 0,
                status             TEXT    NOT NULL,
                last_response_code INTEGER,
                next_attempt_at    INTEGER NOT NULL,
                UNIQUE (subscription_id, sequence)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_deliveries_due
             ON deliveries (status, next_attempt_at);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Seed or replace a subscription. Subscriptions are owned by the
    /// registration API; this helper exists for tests and local tooling.
    pub async fn put_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), IndexerError> {
        let kinds: Vec<&str> = subscription.event_types.iter().map(|k| k.as_str()).collect();
        let event_types = serde_json::to_string(&kinds).map_err(storage_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO subscriptions
             (subscription_id, url, secret, event_types, active)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&subscription.subscription_id)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(&event_types)
        .bind(subscription.active as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Row mappers ──────────────────────────────────────────────────────────────

fn event_from_row(row: &SqliteRow) -> Result<IndexedEvent, IndexerError> {
    let payload_text: String = row.get("payload");
    let payload: EventPayload = serde_json::from_str(&payload_text).map_err(storage_err)?;
    Ok(IndexedEvent {
        event_id: row.get("event_id"),
        chain_id: row.get("chain_id"),
        address: row.get("address"),
        block_number: row.get::<i64, _>("block_number") as u64,
        block_hash: row.get("block_hash"),
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u32,
        payload,
        observed_at: row.get("observed_at"),
        finalized: row.get::<i64, _>("finalized") != 0,
    })
}

fn subscription_from_row(row: &SqliteRow) -> Result<WebhookSubscription, IndexerError> {
    let kinds_text: String = row.get("event_types");
    let kinds: Vec<String> = serde_json::from_str(&kinds_text).map_err(storage_err)?;
    let event_types = kinds
        .iter()
        .map(|k| k.parse::<EventKind>().map_err(IndexerError::Storage))
        .collect::<Result<_, _>>()?;
    Ok(WebhookSubscription {
        subscription_id: row.get("subscription_id"),
        url: row.get("url"),
        secret: row.get("secret"),
        event_types,
        active: row.get::<i64, _>("active") != 0,
    })
}

fn delivery_from_row(row: &SqliteRow) -> Result<WebhookDelivery, IndexerError> {
    let status: String = row.get("status");
    Ok(WebhookDelivery {
        delivery_id: row.get("delivery_id"),
        subscription_id: row.get("subscription_id"),
        event_id: row.get("event_id"),
        sequence: row.get::<i64, _>("sequence") as u64,
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        status: status.parse().map_err(IndexerError::Storage)?,
        last_response_code: row
            .get::<Option<i64>, _>("last_response_code")
            .map(|c| c as u16),
        next_attempt_at: row.get("next_attempt_at"),
    })
}

// ─── CheckpointStore ──────────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, chain_id: &str) -> Result<Option<ChainCheckpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, block_number, block_hash, updated_at
             FROM checkpoints WHERE chain_id = ?",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| ChainCheckpoint {
            chain_id: r.get("chain_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: ChainCheckpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, block_number, block_hash, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(checkpoint.block_number as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn save_if_unchanged(
        &self,
        expected_prev_hash: Option<&str>,
        checkpoint: ChainCheckpoint,
    ) -> Result<(), IndexerError> {
        let affected = match expected_prev_hash {
            None => sqlx::query(
                "INSERT INTO checkpoints (chain_id, block_number, block_hash, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT (chain_id) DO NOTHING",
            )
            .bind(&checkpoint.chain_id)
            .bind(checkpoint.block_number as i64)
            .bind(&checkpoint.block_hash)
            .bind(checkpoint.updated_at)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?
            .rows_affected(),
            Some(expected) => sqlx::query(
                "UPDATE checkpoints
                 SET block_number = ?, block_hash = ?, updated_at = ?
                 WHERE chain_id = ? AND block_hash = ?",
            )
            .bind(checkpoint.block_number as i64)
            .bind(&checkpoint.block_hash)
            .bind(checkpoint.updated_at)
            .bind(&checkpoint.chain_id)
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?
            .rows_affected(),
        };

        if affected == 0 {
            return Err(IndexerError::CheckpointConflict {
                chain_id: checkpoint.chain_id,
            });
        }
        Ok(())
    }

    async fn delete(&self, chain_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ?")
            .bind(chain_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── EventStore ───────────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn upsert(&self, event: &IndexedEvent) -> Result<bool, IndexerError> {
        let payload = serde_json::to_string(&event.payload).map_err(storage_err)?;
        let affected = sqlx::query(
            "INSERT INTO events
             (event_id, chain_id, address, event_type, block_number, block_hash,
              tx_hash, log_index, payload, observed_at, finalized)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(&event.chain_id)
        .bind(&event.address)
        .bind(event.kind().as_str())
        .bind(event.block_number as i64)
        .bind(&event.block_hash)
        .bind(&event.tx_hash)
        .bind(event.log_index as i64)
        .bind(&payload)
        .bind(event.observed_at)
        .bind(event.finalized as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();

        Ok(affected == 1)
    }

    async fn get(&self, event_id: &str) -> Result<Option<IndexedEvent>, IndexerError> {
        let row = sqlx::query("SELECT * FROM events WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| event_from_row(&r)).transpose()
    }

    async fn delete_unfinalized_above(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<u64, IndexerError> {
        let affected = sqlx::query(
            "DELETE FROM events
             WHERE chain_id = ? AND block_number > ? AND finalized = 0",
        )
        .bind(chain_id)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();

        debug!(chain_id, block_number, affected, "rolled back events");
        Ok(affected)
    }

    async fn finalize_up_to(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<u64, IndexerError> {
        let affected = sqlx::query(
            "UPDATE events SET finalized = 1
             WHERE chain_id = ? AND finalized = 0 AND block_number <= ?",
        )
        .bind(chain_id)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();
        Ok(affected)
    }

    async fn finalized_above_exists(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<bool, IndexerError> {
        let row = sqlx::query(
            "SELECT EXISTS(
                SELECT 1 FROM events
                WHERE chain_id = ? AND finalized = 1 AND block_number > ?
             ) AS present",
        )
        .bind(chain_id)
        .bind(block_number as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    async fn newest_event_at_or_before(
        &self,
        chain_id: &str,
        block_number: u64,
    ) -> Result<Option<BlockRef>, IndexerError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash FROM events
             WHERE chain_id = ? AND block_number <= ?
             ORDER BY block_number DESC, log_index DESC
             LIMIT 1",
        )
        .bind(chain_id)
        .bind(block_number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| {
            BlockRef::new(
                r.get::<i64, _>("block_number") as u64,
                r.get::<String, _>("block_hash"),
            )
        }))
    }
}

// ─── SubscriptionStore ────────────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for SqliteStorage {
    async fn active_subscriptions_for(
        &self,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM subscriptions WHERE active = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut matching = Vec::new();
        for row in &rows {
            let sub = subscription_from_row(row)?;
            if sub.wants(kind) {
                matching.push(sub);
            }
        }
        Ok(matching)
    }

    async fn get(
        &self,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, IndexerError> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE subscription_id = ?")
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| subscription_from_row(&r)).transpose()
    }
}

// ─── DeliveryStore ────────────────────────────────────────────────────────────

#[async_trait]
impl DeliveryStore for SqliteStorage {
    async fn create(
        &self,
        subscription_id: &str,
        event_id: &str,
    ) -> Result<WebhookDelivery, IndexerError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let sequence: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence), 0) + 1 AS next
             FROM deliveries WHERE subscription_id = ?",
        )
        .bind(subscription_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?
        .get("next");

        let delivery_id = sqlx::query(
            "INSERT INTO deliveries
             (subscription_id, event_id, sequence, attempt_count, status,
              last_response_code, next_attempt_at)
             VALUES (?, ?, ?, 0, 'pending', NULL, ?)",
        )
        .bind(subscription_id)
        .bind(event_id)
        .bind(sequence)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .last_insert_rowid();

        tx.commit().await.map_err(storage_err)?;

        Ok(WebhookDelivery {
            delivery_id,
            subscription_id: subscription_id.to_string(),
            event_id: event_id.to_string(),
            sequence: sequence as u64,
            attempt_count: 0,
            status: DeliveryStatus::Pending,
            last_response_code: None,
            next_attempt_at: now_ms,
        })
    }

    async fn claim_due(
        &self,
        now_ms: i64,
        limit: u32,
        lease_ms: i64,
    ) -> Result<Vec<WebhookDelivery>, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let rows = sqlx::query(
            "SELECT * FROM deliveries
             WHERE status IN ('pending', 'retrying') AND next_attempt_at <= ?
             ORDER BY next_attempt_at
             LIMIT ?",
        )
        .bind(now_ms)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage_err)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let delivery = delivery_from_row(row)?;
            sqlx::query("UPDATE deliveries SET next_attempt_at = ? WHERE delivery_id = ?")
                .bind(now_ms + lease_ms)
                .bind(delivery.delivery_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
            claimed.push(delivery);
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(claimed)
    }

    async fn mark_delivered(
        &self,
        delivery_id: i64,
        response_code: u16,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE deliveries
             SET status = 'delivered',
                 attempt_count = attempt_count + 1,
                 last_response_code = ?
             WHERE delivery_id = ?",
        )
        .bind(response_code as i64)
        .bind(delivery_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_retrying(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
        next_attempt_at: i64,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE deliveries
             SET status = 'retrying',
                 attempt_count = ?,
                 last_response_code = ?,
                 next_attempt_at = ?
             WHERE delivery_id = ?",
        )
        .bind(attempt_count as i64)
        .bind(response_code.map(|c| c as i64))
        .bind(next_attempt_at)
        .bind(delivery_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_dead_lettered(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "UPDATE deliveries
             SET status = 'dead_lettered',
                 attempt_count = ?,
                 last_response_code = ?
             WHERE delivery_id = ?",
        )
        .bind(attempt_count as i64)
        .bind(response_code.map(|c| c as i64))
        .bind(delivery_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skillindex_core::types::event_id;

    fn sample_event(block: u64, log_index: u32) -> IndexedEvent {
        let tx_hash = format!("0x{block:04x}{log_index:02x}");
        IndexedEvent {
            event_id: event_id("base", &tx_hash, log_index),
            chain_id: "base".into(),
            address: "0x00000000000000000000000000000000000000aa".into(),
            block_number: block,
            block_hash: format!("0xb{block:x}"),
            tx_hash,
            log_index,
            payload: EventPayload::ClaimSubmitted {
                claim_id: block,
                claimant: "0x1111111111111111111111111111111111111111".into(),
                skill_id: format!("0x{}", "ab".repeat(32)),
                level: 2,
            },
            observed_at: 1_700_000_000,
            finalized: false,
        }
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .save(ChainCheckpoint::new("base", 1_000, "0xabcdef"))
            .await
            .unwrap();

        let loaded = store.load("base").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 1_000);
        assert_eq!(loaded.block_hash, "0xabcdef");

        assert!(store.load("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_cas_insert_and_update() {
        let store = SqliteStorage::in_memory().await.unwrap();

        store
            .save_if_unchanged(None, ChainCheckpoint::new("base", 10, "0xa"))
            .await
            .unwrap();

        // Second seeding attempt fails.
        assert!(matches!(
            store
                .save_if_unchanged(None, ChainCheckpoint::new("base", 11, "0xb"))
                .await,
            Err(IndexerError::CheckpointConflict { .. })
        ));

        // Guarded advance succeeds once, then the guard is stale.
        store
            .save_if_unchanged(Some("0xa"), ChainCheckpoint::new("base", 11, "0xb"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .save_if_unchanged(Some("0xa"), ChainCheckpoint::new("base", 12, "0xc"))
                .await,
            Err(IndexerError::CheckpointConflict { .. })
        ));

        assert_eq!(store.load("base").await.unwrap().unwrap().block_number, 11);
    }

    // ── EventStore ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn event_upsert_is_idempotent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let event = sample_event(100, 0);

        assert!(store.upsert(&event).await.unwrap());
        assert!(!store.upsert(&event).await.unwrap());

        let loaded = EventStore::get(&store, &event.event_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, event);
    }

    #[tokio::test]
    async fn rollback_spares_finalized_and_other_chains() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.upsert(&sample_event(90, 0)).await.unwrap();
        store.upsert(&sample_event(95, 0)).await.unwrap();
        store.upsert(&sample_event(96, 0)).await.unwrap();
        let mut polygon = sample_event(95, 1);
        polygon.chain_id = "polygon".into();
        polygon.event_id = event_id("polygon", &polygon.tx_hash, 1);
        store.upsert(&polygon).await.unwrap();

        store.finalize_up_to("base", 90).await.unwrap();

        let deleted = store.delete_unfinalized_above("base", 92).await.unwrap();
        assert_eq!(deleted, 2);

        // Finalized base row and the polygon row survive.
        assert!(EventStore::get(&store, &sample_event(90, 0).event_id)
            .await
            .unwrap()
            .is_some());
        assert!(EventStore::get(&store, &polygon.event_id)
            .await
            .unwrap()
            .is_some());
        assert!(store.finalized_above_exists("base", 50).await.unwrap());
        assert!(!store.finalized_above_exists("base", 90).await.unwrap());
    }

    #[tokio::test]
    async fn newest_anchor_orders_by_block_then_log() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.upsert(&sample_event(10, 0)).await.unwrap();
        store.upsert(&sample_event(10, 4)).await.unwrap();
        store.upsert(&sample_event(40, 0)).await.unwrap();

        let anchor = store
            .newest_event_at_or_before("base", 30)
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

    // ── SubscriptionStore ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn subscription_roundtrip_and_matching() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .put_subscription(&WebhookSubscription {
                subscription_id: "notify".into(),
                url: "https://hooks.example.com/notify".into(),
                secret: "s3cret".into(),
                event_types: [EventKind::ClaimApproved, EventKind::ClaimSubmitted]
                    .into_iter()
                    .collect(),
                active: true,
            })
            .await
            .unwrap();
        store
            .put_subscription(&WebhookSubscription {
                subscription_id: "paused".into(),
                url: "https://hooks.example.com/paused".into(),
                secret: "s3cret".into(),
                event_types: [EventKind::ClaimApproved].into_iter().collect(),
                active: false,
            })
            .await
            .unwrap();

        let matched = store
            .active_subscriptions_for(EventKind::ClaimApproved)
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].subscription_id, "notify");

        let loaded = SubscriptionStore::get(&store, "paused")
            .await
            .unwrap()
            .unwrap();
        assert!(!loaded.active);
        assert!(SubscriptionStore::get(&store, "missing")
            .await
            .unwrap()
            .is_none());
    }

    // ── DeliveryStore ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn delivery_sequences_per_subscription() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let d1 = store.create("sub-a", "0xe1").await.unwrap();
        let d2 = store.create("sub-a", "0xe2").await.unwrap();
        let d3 = store.create("sub-b", "0xe1").await.unwrap();

        assert_eq!(d1.sequence, 1);
        assert_eq!(d2.sequence, 2);
        assert_eq!(d3.sequence, 1);
        assert_eq!(d1.status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn claim_lease_hides_rows_until_expiry() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.create("sub-a", "0xe1").await.unwrap();
        store.create("sub-a", "0xe2").await.unwrap();

        let now = chrono::Utc::now().timestamp_millis();
        let first = store.claim_due(now, 10, 60_000).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(store.claim_due(now, 10, 60_000).await.unwrap().is_empty());
        assert_eq!(
            store.claim_due(now + 60_001, 10, 60_000).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn delivery_lifecycle_transitions() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let d = store.create("sub-a", "0xe1").await.unwrap();

        store
            .mark_retrying(d.delivery_id, 1, Some(500), 9_999_999_999_999)
            .await
            .unwrap();
        let now = chrono::Utc::now().timestamp_millis();
        assert!(
            store.claim_due(now, 10, 1_000).await.unwrap().is_empty(),
            "retrying row is not due until next_attempt_at"
        );

        store
            .mark_dead_lettered(d.delivery_id, 3, Some(500))
            .await
            .unwrap();
        assert!(store
            .claim_due(now + 10_000_000_000_000, 10, 1_000)
            .await
            .unwrap()
            .is_empty());

        let d2 = store.create("sub-a", "0xe2").await.unwrap();
        store.mark_delivered(d2.delivery_id, 204).await.unwrap();
        assert!(store
            .claim_due(now + 10_000_000_000_000, 10, 1_000)
            .await
            .unwrap()
            .is_empty());
    }
}
