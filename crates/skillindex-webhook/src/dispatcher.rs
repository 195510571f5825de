//! The webhook dispatcher — matches events to subscriptions and drives
//! deliveries to a terminal state.
//!
//! Two halves, both independent of the indexing loops:
//! - the **intake** consumes newly indexed events off the bounded queue and
//!   fans each out into one `Pending` delivery per matching subscription;
//! - a **worker pool** drains due deliveries from the durable store via
//!   lease-based claiming, so a dispatcher restart resumes where it left
//!   off (at-least-once — receivers dedupe on `event_id` + `sequence`).
//!
//! Delivery failures never propagate back into the indexing path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use skillindex_core::{EventStore, IndexedEvent, PipelineMetrics, RetryConfig, RetryPolicy};

use crate::payload::WebhookPayload;
use crate::sender::WebhookTransport;
use crate::signer::sign;
use crate::subscription::{DeliveryStore, SubscriptionStore, WebhookDelivery};

/// Dispatcher tuning. Defaults match the documented operating point; all of
/// it is deployment configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrent delivery workers.
    pub workers: usize,
    /// Attempts before a delivery dead-letters.
    pub max_attempts: u32,
    /// Retry backoff schedule.
    pub backoff: RetryConfig,
    /// Deliveries claimed per store round-trip.
    pub claim_batch: u32,
    /// How long a claimed delivery stays invisible to other workers.
    pub claim_lease_ms: i64,
    /// Idle pause when no deliveries are due.
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            max_attempts: 8,
            backoff: RetryConfig::delivery(),
            claim_batch: 32,
            claim_lease_ms: 30_000,
            poll_interval_ms: 500,
        }
    }
}

/// Long-running dispatch service.
pub struct WebhookDispatcher {
    config: DispatcherConfig,
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    events: Arc<dyn EventStore>,
    transport: Arc<dyn WebhookTransport>,
    metrics: Arc<PipelineMetrics>,
    backoff: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl WebhookDispatcher {
    pub fn new(
        config: DispatcherConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        events: Arc<dyn EventStore>,
        transport: Arc<dyn WebhookTransport>,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let backoff = RetryPolicy::new(config.backoff.clone());
        Self {
            config,
            subscriptions,
            deliveries,
            events,
            transport,
            metrics,
            backoff,
            shutdown,
        }
    }

    /// Run the intake and the worker pool until shutdown.
    pub async fn run(self, intake: mpsc::Receiver<IndexedEvent>) {
        let this = Arc::new(self);
        let mut tasks = Vec::with_capacity(this.config.workers + 1);
        tasks.push(tokio::spawn(this.clone().intake_loop(intake)));
        for worker_id in 0..this.config.workers {
            tasks.push(tokio::spawn(this.clone().worker_loop(worker_id)));
        }
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("dispatcher stopped");
    }

    async fn intake_loop(self: Arc<Self>, mut intake: mpsc::Receiver<IndexedEvent>) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                maybe = intake.recv() => match maybe {
                    Some(event) => {
                        self.metrics.set_queue_depth(intake.len() as u64);
                        self.fan_out(&event).await;
                    }
                    None => return,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Create one pending delivery per matching subscription.
    async fn fan_out(&self, event: &IndexedEvent) {
        let subs = match self
            .subscriptions
            .active_subscriptions_for(event.kind())
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                // The event itself is durably stored; deliveries for it can
                // be backfilled once the store recovers.
                tracing::error!(event_id = %event.event_id, error = %e, "subscription lookup failed");
                return;
            }
        };
        for sub in subs {
            match self
                .deliveries
                .create(&sub.subscription_id, &event.event_id)
                .await
            {
                Ok(delivery) => tracing::debug!(
                    event_id = %event.event_id,
                    subscription_id = %sub.subscription_id,
                    sequence = delivery.sequence,
                    "delivery scheduled"
                ),
                Err(e) => tracing::error!(
                    event_id = %event.event_id,
                    subscription_id = %sub.subscription_id,
                    error = %e,
                    "failed to schedule delivery"
                ),
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return;
            }
            let now_ms = chrono::Utc::now().timestamp_millis();
            let batch = match self
                .deliveries
                .claim_due(now_ms, self.config.claim_batch, self.config.claim_lease_ms)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "claim failed");
                    vec![]
                }
            };

            if batch.is_empty() {
                let pause = Duration::from_millis(self.config.poll_interval_ms);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for delivery in batch {
                self.attempt(delivery).await;
                if *shutdown.borrow() {
                    // Remaining claimed rows come due again after the lease.
                    return;
                }
            }
        }
    }

    /// One delivery attempt: build, sign, POST, record the outcome.
    async fn attempt(&self, delivery: WebhookDelivery) {
        let subscription = match self.subscriptions.get(&delivery.subscription_id).await {
            Ok(Some(sub)) if sub.active => sub,
            Ok(_) => {
                // Unsubscribed (or deactivated) since the delivery was
                // scheduled — nothing left to deliver to.
                tracing::warn!(
                    delivery_id = delivery.delivery_id,
                    subscription_id = %delivery.subscription_id,
                    "subscription inactive, dead-lettering"
                );
                self.dead_letter(&delivery, delivery.attempt_count, None).await;
                return;
            }
            Err(e) => {
                tracing::error!(delivery_id = delivery.delivery_id, error = %e, "subscription load failed");
                return; // stays leased, retried once the lease lapses
            }
        };

        let event = match self.events.get(&delivery.event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                // The event was rolled back by reorg reconciliation after
                // this delivery was scheduled.
                tracing::warn!(
                    delivery_id = delivery.delivery_id,
                    event_id = %delivery.event_id,
                    "event no longer stored, dead-lettering"
                );
                self.dead_letter(&delivery, delivery.attempt_count, None).await;
                return;
            }
            Err(e) => {
                tracing::error!(delivery_id = delivery.delivery_id, error = %e, "event load failed");
                return;
            }
        };

        let body = match WebhookPayload::from_event(&event, delivery.sequence).canonical_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(delivery_id = delivery.delivery_id, error = %e, "payload serialization failed");
                self.dead_letter(&delivery, delivery.attempt_count, None).await;
                return;
            }
        };
        let signature = sign(&subscription.secret, &body);

        let outcome = self
            .transport
            .post(&subscription.url, &body, &signature, delivery.sequence)
            .await;

        let (code, reason) = match outcome {
            Ok(code) if (200..300).contains(&code) => {
                if let Err(e) = self.deliveries.mark_delivered(delivery.delivery_id, code).await {
                    tracing::error!(delivery_id = delivery.delivery_id, error = %e, "mark_delivered failed");
                    return;
                }
                self.metrics.record_delivered();
                tracing::debug!(
                    delivery_id = delivery.delivery_id,
                    sequence = delivery.sequence,
                    code,
                    "delivered"
                );
                return;
            }
            Ok(code) => (Some(code), format!("HTTP {code}")),
            Err(e) => (None, e),
        };

        // Failed attempt: schedule a retry or give up.
        self.metrics.record_delivery_failure();
        let attempts = delivery.attempt_count + 1;
        if attempts >= self.config.max_attempts {
            tracing::error!(
                delivery_id = delivery.delivery_id,
                subscription_id = %delivery.subscription_id,
                attempts,
                reason = %reason,
                "delivery dead-lettered"
            );
            self.dead_letter(&delivery, attempts, code).await;
        } else {
            let delay = self.backoff.delay(attempts);
            let next_attempt_at =
                chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;
            if let Err(e) = self
                .deliveries
                .mark_retrying(delivery.delivery_id, attempts, code, next_attempt_at)
                .await
            {
                tracing::error!(delivery_id = delivery.delivery_id, error = %e, "mark_retrying failed");
                return;
            }
            tracing::warn!(
                delivery_id = delivery.delivery_id,
                attempts,
                retry_in_ms = delay.as_millis() as u64,
                reason = %reason,
                "delivery failed, retrying"
            );
        }
    }

    async fn dead_letter(&self, delivery: &WebhookDelivery, attempts: u32, code: Option<u16>) {
        if let Err(e) = self
            .deliveries
            .mark_dead_lettered(delivery.delivery_id, attempts, code)
            .await
        {
            tracing::error!(delivery_id = delivery.delivery_id, error = %e, "mark_dead_lettered failed");
            return;
        }
        self.metrics.record_dead_lettered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_operating_point() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.workers, 16);
        assert_eq!(cfg.max_attempts, 8);
        assert_eq!(cfg.backoff.base, Duration::from_secs(1));
        assert_eq!(cfg.backoff.cap, Duration::from_secs(600));
    }
}
