//! skillindex-webhook — signed, retried webhook fan-out for indexed events.
//!
//! ```text
//! indexer queue ─→ intake ─→ WebhookDelivery rows (durable)
//!                                   │
//!                        worker pool (claim → sign → POST)
//!                                   │
//!                    Delivered / Retrying / DeadLettered
//! ```

pub mod dispatcher;
pub mod payload;
pub mod sender;
pub mod signer;
pub mod subscription;

pub use dispatcher::{DispatcherConfig, WebhookDispatcher};
pub use payload::WebhookPayload;
pub use sender::{HttpWebhookTransport, WebhookTransport};
pub use signer::{sign, verify, SEQUENCE_HEADER, SIGNATURE_HEADER};
pub use subscription::{
    DeliveryStatus, DeliveryStore, SubscriptionStore, WebhookDelivery, WebhookSubscription,
};
