#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use payments_core::adapters::InMemoryTransactionStore;
use payments_core::domain::{PaymentProvider, ProviderFields, Transaction, TransactionUpdate};
use payments_core::gateway::{
    ChargeOutcome, ChargeParams, GatewayError, PaymentGateway, RefundOutcome, RefundParams,
};
use payments_core::ports::{StoreResult, TransactionStore};
use payments_core::services::{EventReconciler, PaymentService, WebhookService};
use payments_core::webhook::stripe::{sign_payload, DEFAULT_TOLERANCE};
use payments_core::webhook::{EventRegistry, StripeEventVerifier};
use payments_core::{api_router, webhook_router, AppState};

pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Scripted gateway that records every call.
pub struct MockGateway {
    pub charge_outcome: Mutex<ChargeOutcome>,
    pub refund_outcome: Mutex<RefundOutcome>,
    pub charges: Mutex<Vec<ChargeParams>>,
    pub refunds: Mutex<Vec<RefundParams>>,
    /// Simulated gateway round trip, so concurrent callers overlap.
    pub latency: Mutex<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            charge_outcome: Mutex::new(ChargeOutcome::Accepted {
                handles: handles(&[("payment_intent_id", "pi_1"), ("charge_id", "ch_1")]),
            }),
            refund_outcome: Mutex::new(RefundOutcome::Refunded {
                handles: handles(&[("refund_id", "re_1"), ("charge_id", "ch_1")]),
            }),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_latency(latency: Duration) -> Self {
        let gateway = Self::new();
        *gateway.latency.lock().unwrap() = latency;
        gateway
    }

    pub fn refunded_charges(&self) -> Vec<String> {
        self.refunds
            .lock()
            .unwrap()
            .iter()
            .map(|params| params.charge_id.clone())
            .collect()
    }

    async fn round_trip(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn charge_calls(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    pub fn refund_calls(&self) -> usize {
        self.refunds.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn charge(&self, params: &ChargeParams) -> Result<ChargeOutcome, GatewayError> {
        self.charges.lock().unwrap().push(params.clone());
        self.round_trip().await;
        Ok(self.charge_outcome.lock().unwrap().clone())
    }

    async fn refund(&self, params: &RefundParams) -> Result<RefundOutcome, GatewayError> {
        self.refunds.lock().unwrap().push(params.clone());
        self.round_trip().await;
        Ok(self.refund_outcome.lock().unwrap().clone())
    }
}

/// In-memory store that counts writes.
#[derive(Default)]
pub struct CountingStore {
    pub inner: InMemoryTransactionStore,
    pub inserts: AtomicUsize,
    pub updates: AtomicUsize,
}

impl CountingStore {
    pub fn writes(&self) -> usize {
        self.inserts.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionStore for CountingStore {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(tx).await
    }

    async fn get(&self, transaction_id: &str) -> StoreResult<Transaction> {
        self.inner.get(transaction_id).await
    }

    async fn find_by_provider_field(&self, key: &str, value: &str) -> StoreResult<Transaction> {
        self.inner.find_by_provider_field(key, value).await
    }

    async fn update(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> StoreResult<Transaction> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(transaction_id, update).await
    }
}

pub fn handles(pairs: &[(&str, &str)]) -> ProviderFields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

pub struct TestApp {
    pub api: Router,
    pub webhooks: Router,
    pub store: Arc<CountingStore>,
    pub gateway: Arc<MockGateway>,
}

pub fn state_with(store: Arc<dyn TransactionStore>, gateway: Arc<dyn PaymentGateway>) -> AppState {
    let webhooks = WebhookService::builder(EventReconciler::new(store.clone()))
        .provider(
            PaymentProvider::Stripe,
            Arc::new(StripeEventVerifier::new(WEBHOOK_SECRET, DEFAULT_TOLERANCE)),
            EventRegistry::stripe(),
        )
        .build();

    AppState {
        payments: PaymentService::new(store, gateway),
        webhooks,
        db: None,
        debug_mode: false,
        log_request_body: false,
    }
}

pub fn test_app() -> TestApp {
    test_app_with(MockGateway::new())
}

pub fn test_app_with(gateway: MockGateway) -> TestApp {
    let store = Arc::new(CountingStore::default());
    let gateway = Arc::new(gateway);
    let state = state_with(store.clone(), gateway.clone());

    TestApp {
        api: api_router(state.clone()),
        webhooks: webhook_router(state),
        store,
        gateway,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> (u16, Value) {
    let response: Response<Body> = app.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn stripe_event(event_id: &str, event_type: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "object": "event",
        "type": event_type,
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn signed_delivery(provider: &str, payload: Vec<u8>) -> Request<Body> {
    let signature = sign_payload(&payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap();
    Request::builder()
        .method("POST")
        .uri(format!("/payments/{}/events", provider))
        .header("content-type", "application/json")
        .header("Stripe-Signature", signature)
        .body(Body::from(payload))
        .unwrap()
}

/// Charges through the API and returns the new transaction id.
pub async fn charge(app: &TestApp, amount: i64) -> String {
    let (status, body) = send(
        &app.api,
        post_json(
            "/payments",
            json!({"amount": amount, "currency": "usd", "payment_method": "pm_card_visa"}),
        ),
    )
    .await;
    assert_eq!(status, 201, "charge failed: {}", body);
    body["transaction_id"].as_str().unwrap().to_string()
}
