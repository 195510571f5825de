//! Subscription and delivery records, plus the store traits the dispatcher
//! drives.
//!
//! Subscriptions are owned by the external registration API — this crate
//! only reads them. Deliveries are created and mutated exclusively by the
//! dispatcher.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skillindex_core::{EventKind, IndexerError};

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub subscription_id: String,
    pub url: String,
    /// Shared secret for HMAC signing.
    pub secret: String,
    /// Event kinds this endpoint wants.
    pub event_types: HashSet<EventKind>,
    pub active: bool,
}

impl WebhookSubscription {
    pub fn wants(&self, kind: EventKind) -> bool {
        self.active && self.event_types.contains(&kind)
    }
}

/// Delivery lifecycle: `Pending → Delivered`, or
/// `Pending → Retrying … → DeadLettered` once attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Delivered,
    DeadLettered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Delivered => "delivered",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "delivered" => Ok(Self::Delivered),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One scheduled delivery of one event to one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Storage-assigned id.
    pub delivery_id: i64,
    pub subscription_id: String,
    pub event_id: String,
    /// Strictly increasing per subscription, assigned at creation.
    pub sequence: u64,
    pub attempt_count: u32,
    pub status: DeliveryStatus,
    pub last_response_code: Option<u16>,
    /// Unix millis; due when `<= now`. Claiming bumps this by a lease so a
    /// crashed worker's rows become due again (at-least-once).
    pub next_attempt_at: i64,
}

/// Read access to registered subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All active subscriptions whose `event_types` include `kind`.
    async fn active_subscriptions_for(
        &self,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, IndexerError>;

    async fn get(&self, subscription_id: &str)
        -> Result<Option<WebhookSubscription>, IndexerError>;
}

/// The durable delivery queue.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Create a `Pending` delivery due immediately, assigning the next
    /// per-subscription sequence number atomically.
    async fn create(
        &self,
        subscription_id: &str,
        event_id: &str,
    ) -> Result<WebhookDelivery, IndexerError>;

    /// Claim up to `limit` due deliveries, pushing each row's
    /// `next_attempt_at` forward by `lease_ms` so concurrent workers get
    /// disjoint batches.
    async fn claim_due(
        &self,
        now_ms: i64,
        limit: u32,
        lease_ms: i64,
    ) -> Result<Vec<WebhookDelivery>, IndexerError>;

    async fn mark_delivered(
        &self,
        delivery_id: i64,
        response_code: u16,
    ) -> Result<(), IndexerError>;

    async fn mark_retrying(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
        next_attempt_at: i64,
    ) -> Result<(), IndexerError>;

    async fn mark_dead_lettered(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
    ) -> Result<(), IndexerError>;
}
