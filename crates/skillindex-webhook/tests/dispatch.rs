//! Delivery lifecycle scenarios driven through the real dispatcher with
//! in-memory stores and a scripted transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use skillindex_core::{
    event_id, EventKind, EventPayload, EventStore, IndexedEvent, IndexerError, MemoryEventStore,
    PipelineMetrics, RetryConfig,
};
use skillindex_webhook::{
    verify, DeliveryStatus, DeliveryStore, DispatcherConfig, SubscriptionStore, WebhookDelivery,
    WebhookDispatcher, WebhookSubscription, WebhookTransport,
};

// ─── In-memory stores ─────────────────────────────────────────────────────────

struct MemorySubscriptionStore {
    subs: Vec<WebhookSubscription>,
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn active_subscriptions_for(
        &self,
        kind: EventKind,
    ) -> Result<Vec<WebhookSubscription>, IndexerError> {
        Ok(self.subs.iter().filter(|s| s.wants(kind)).cloned().collect())
    }

    async fn get(
        &self,
        subscription_id: &str,
    ) -> Result<Option<WebhookSubscription>, IndexerError> {
        Ok(self
            .subs
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }
}

#[derive(Default)]
struct DeliveryState {
    next_id: i64,
    sequences: HashMap<String, u64>,
    rows: Vec<WebhookDelivery>,
}

#[derive(Default)]
struct MemoryDeliveryStore {
    state: Mutex<DeliveryState>,
}

impl MemoryDeliveryStore {
    fn rows(&self) -> Vec<WebhookDelivery> {
        self.state.lock().unwrap().rows.clone()
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn create(
        &self,
        subscription_id: &str,
        event_id: &str,
    ) -> Result<WebhookDelivery, IndexerError> {
        let mut state = self.state.lock().unwrap();
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
            next_attempt_at: 0,
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
        let mut state = self.state.lock().unwrap();
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
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.delivery_id == delivery_id)
            .ok_or_else(|| IndexerError::Storage("unknown delivery".into()))?;
        row.attempt_count += 1;
        row.status = DeliveryStatus::Delivered;
        row.last_response_code = Some(response_code);
        Ok(())
    }

    async fn mark_retrying(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
        next_attempt_at: i64,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.delivery_id == delivery_id)
            .ok_or_else(|| IndexerError::Storage("unknown delivery".into()))?;
        row.attempt_count = attempt_count;
        row.status = DeliveryStatus::Retrying;
        row.last_response_code = response_code;
        row.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn mark_dead_lettered(
        &self,
        delivery_id: i64,
        attempt_count: u32,
        response_code: Option<u16>,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .rows
            .iter_mut()
            .find(|r| r.delivery_id == delivery_id)
            .ok_or_else(|| IndexerError::Storage("unknown delivery".into()))?;
        row.attempt_count = attempt_count;
        row.status = DeliveryStatus::DeadLettered;
        row.last_response_code = response_code;
        Ok(())
    }
}

// ─── Scripted transport ───────────────────────────────────────────────────────

struct Request {
    url: String,
    body: Vec<u8>,
    signature: String,
    sequence: u64,
}

/// Replays a scripted list of responses, then answers 200.
#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<Vec<Result<u16, String>>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    fn scripted(responses: Vec<Result<u16, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(vec![]),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        signature: &str,
        sequence: u64,
    ) -> Result<u16, String> {
        self.requests.lock().unwrap().push(Request {
            url: url.to_string(),
            body: body.to_vec(),
            signature: signature.to_string(),
            sequence,
        });
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(200)
        } else {
            responses.remove(0)
        }
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

fn claim_event(n: u64) -> IndexedEvent {
    let tx_hash = format!("0xtx{n:x}");
    IndexedEvent {
        event_id: event_id("base", &tx_hash, 0),
        chain_id: "base".into(),
        address: "0x00000000000000000000000000000000000000aa".into(),
        block_number: 100 + n,
        block_hash: format!("0xb{n:x}"),
        tx_hash,
        log_index: 0,
        payload: EventPayload::ClaimApproved {
            claim_id: n,
            verifier: "0x2222222222222222222222222222222222222222".into(),
        },
        observed_at: 0,
        finalized: false,
    }
}

fn subscription(id: &str, kinds: &[EventKind]) -> WebhookSubscription {
    WebhookSubscription {
        subscription_id: id.into(),
        url: format!("https://hooks.example.com/{id}"),
        secret: format!("secret-{id}"),
        event_types: kinds.iter().copied().collect(),
        active: true,
    }
}

struct Harness {
    deliveries: Arc<MemoryDeliveryStore>,
    transport: Arc<ScriptedTransport>,
    events: Arc<MemoryEventStore>,
    intake: mpsc::Sender<IndexedEvent>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

fn start(
    subs: Vec<WebhookSubscription>,
    transport: ScriptedTransport,
    max_attempts: u32,
) -> Harness {
    let deliveries = Arc::new(MemoryDeliveryStore::default());
    let events = Arc::new(MemoryEventStore::new());
    let transport = Arc::new(transport);
    let (intake_tx, intake_rx) = mpsc::channel(64);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let config = DispatcherConfig {
        workers: 2,
        max_attempts,
        backoff: RetryConfig {
            max_attempts,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        },
        claim_batch: 8,
        claim_lease_ms: 50,
        poll_interval_ms: 5,
    };

    let dispatcher = WebhookDispatcher::new(
        config,
        Arc::new(MemorySubscriptionStore { subs }),
        deliveries.clone(),
        events.clone(),
        transport.clone(),
        Arc::new(PipelineMetrics::new()),
        shutdown_rx,
    );
    let handle = tokio::spawn(dispatcher.run(intake_rx));

    Harness {
        deliveries,
        transport,
        events,
        intake: intake_tx,
        shutdown,
        handle,
    }
}

impl Harness {
    async fn publish(&self, event: IndexedEvent) {
        self.events.upsert(&event).await.unwrap();
        self.intake.send(event).await.unwrap();
    }

    async fn wait_until<F: Fn(&[WebhookDelivery]) -> bool>(&self, cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if cond(&self.deliveries.rows()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never reached");
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap();
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_signed_payloads_with_increasing_sequence() {
    let sub = subscription("analytics", &[EventKind::ClaimApproved]);
    let secret = sub.secret.clone();
    let h = start(vec![sub], ScriptedTransport::default(), 8);

    h.publish(claim_event(1)).await;
    h.publish(claim_event(2)).await;

    h.wait_until(|rows| {
        rows.len() == 2 && rows.iter().all(|r| r.status == DeliveryStatus::Delivered)
    })
    .await;

    let requests = h.transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let mut sequences = Vec::new();
    for req in requests.iter() {
        assert_eq!(req.url, "https://hooks.example.com/analytics");
        // The signature verifies against the exact bytes sent.
        assert!(verify(&secret, &req.body, &req.signature));
        let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
        assert_eq!(body["event_type"], "ClaimApproved");
        assert_eq!(body["chain_id"], "base");
        assert_eq!(body["sequence"], req.sequence);
        sequences.push(req.sequence);
    }
    drop(requests);
    sequences.sort();
    assert_eq!(sequences, vec![1, 2], "sequence strictly increasing");

    let rows = h.deliveries.rows();
    assert!(rows.iter().all(|r| r.last_response_code == Some(200)));
    assert!(rows.iter().all(|r| r.attempt_count == 1));

    h.stop().await;
}

#[tokio::test]
async fn three_consecutive_500s_dead_letter_after_exactly_three_attempts() {
    let sub = subscription("flaky", &[EventKind::ClaimApproved]);
    let transport = ScriptedTransport::scripted(vec![Ok(500), Ok(500), Ok(500)]);
    let h = start(vec![sub], transport, 3);

    h.publish(claim_event(7)).await;

    h.wait_until(|rows| {
        rows.len() == 1 && rows[0].status == DeliveryStatus::DeadLettered
    })
    .await;

    let rows = h.deliveries.rows();
    assert_eq!(rows[0].attempt_count, 3, "exactly three recorded attempts");
    assert_eq!(rows[0].last_response_code, Some(500));
    assert_eq!(h.transport.request_count(), 3);

    h.stop().await;
}

#[tokio::test]
async fn transport_errors_retry_then_succeed() {
    let sub = subscription("shaky", &[EventKind::ClaimApproved]);
    let transport =
        ScriptedTransport::scripted(vec![Err("connection refused".into()), Ok(503), Ok(204)]);
    let h = start(vec![sub], transport, 8);

    h.publish(claim_event(9)).await;

    h.wait_until(|rows| {
        rows.len() == 1 && rows[0].status == DeliveryStatus::Delivered
    })
    .await;

    let rows = h.deliveries.rows();
    assert_eq!(rows[0].attempt_count, 3);
    assert_eq!(rows[0].last_response_code, Some(204));
    assert_eq!(h.transport.request_count(), 3);

    h.stop().await;
}

#[tokio::test]
async fn non_matching_events_schedule_nothing() {
    let sub = subscription("claims-only", &[EventKind::ClaimApproved]);
    let h = start(vec![sub], ScriptedTransport::default(), 8);

    let profile = IndexedEvent {
        payload: EventPayload::ProfileCreated {
            profile_id: 1,
            owner: "0x1111111111111111111111111111111111111111".into(),
        },
        ..claim_event(1)
    };
    h.publish(profile).await;

    // Give the intake a moment; nothing may be scheduled.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.deliveries.rows().is_empty());
    assert_eq!(h.transport.request_count(), 0);

    h.stop().await;
}

#[tokio::test]
async fn each_subscription_gets_its_own_sequence() {
    let subs = vec![
        subscription("first", &[EventKind::ClaimApproved]),
        subscription("second", &[EventKind::ClaimApproved]),
    ];
    let h = start(subs, ScriptedTransport::default(), 8);

    h.publish(claim_event(1)).await;
    h.publish(claim_event(2)).await;

    h.wait_until(|rows| {
        rows.len() == 4 && rows.iter().all(|r| r.status == DeliveryStatus::Delivered)
    })
    .await;

    let rows = h.deliveries.rows();
    for sub_id in ["first", "second"] {
        let mut seqs: Vec<u64> = rows
            .iter()
            .filter(|r| r.subscription_id == sub_id)
            .map(|r| r.sequence)
            .collect();
        seqs.sort();
        assert_eq!(seqs, vec![1, 2], "per-subscription sequence for {sub_id}");
    }

    h.stop().await;
}
