//! Shared harness for router-level tests: in-memory bookings, a scripted
//! supplier and an in-process checkout provider.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wayfare_backend::api::{self, AppState};
use wayfare_backend::bookings::types::{HotelOffer, OfferSnapshot, Price};
use wayfare_backend::cache::InMemoryCache;
use wayfare_backend::database::{BookingRepository, InMemoryBookingRepository};
use wayfare_backend::health::{self, HealthChecker};
use wayfare_backend::payments::providers::stripe::parse_stripe_event;
use wayfare_backend::payments::utils::{sign_timestamped_payload, verify_timestamped_signature};
use wayfare_backend::payments::{
    CheckoutEvent, CheckoutProvider, CheckoutSession, CheckoutSessionRequest, PaymentError,
    PaymentResult, ProviderName, SessionPaymentState, SessionState,
};
use wayfare_backend::payments::types::WebhookVerificationResult;
use wayfare_backend::services::{
    BookingStore, CheckoutSessionOrchestrator, CheckoutSettings, ConfirmationReconciler,
    FixedRateProvider, FxSmartSaveEngine, InMemoryRateLimiter, PrebookingValidator,
    ProvisionalBookingManager, RateCache, RateLimitPolicy, RateSnapshot, SmartSaveResult,
    SmartSaveSettings,
};
use wayfare_backend::supplier::{
    RetryPolicy, SearchParams, SupplierApi, SupplierClient, SupplierError, SupplierResult,
    SupplierToken, SupplierTokenProvider, TokenSource,
};

pub const WEBHOOK_SECRET: &str = "whsec_integration";

// ---------------------------------------------------------------------------
// Supplier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedSupplier {
    offers: Mutex<Vec<OfferSnapshot>>,
    reprice_to: Mutex<Option<Price>>,
    sold_out: AtomicBool,
    pub search_calls: AtomicU32,
}

impl ScriptedSupplier {
    pub fn set_offers(&self, offers: Vec<OfferSnapshot>) {
        *self.offers.lock().unwrap() = offers;
    }

    pub fn reprice_to(&self, price: Price) {
        *self.reprice_to.lock().unwrap() = Some(price);
    }

    pub fn sell_out(&self) {
        self.sold_out.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SupplierApi for ScriptedSupplier {
    async fn search(
        &self,
        _token: &str,
        _params: &SearchParams,
        _currency: &str,
    ) -> SupplierResult<Vec<OfferSnapshot>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.offers.lock().unwrap().clone())
    }

    async fn reprice(
        &self,
        _token: &str,
        offer: &OfferSnapshot,
        _currency: &str,
    ) -> SupplierResult<OfferSnapshot> {
        if self.sold_out.load(Ordering::SeqCst) {
            return Err(SupplierError::OfferUnavailable {
                offer_id: offer.offer_id().to_string(),
            });
        }
        Ok(match self.reprice_to.lock().unwrap().clone() {
            Some(price) => offer.with_price(price),
            None => offer.clone(),
        })
    }
}

struct StaticToken;

#[async_trait]
impl TokenSource for StaticToken {
    async fn fetch_token(&self) -> SupplierResult<SupplierToken> {
        Ok(SupplierToken {
            access_token: "integration-token".to_string(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

// ---------------------------------------------------------------------------
// Checkout provider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InProcessCheckout {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    by_key: Mutex<HashMap<String, String>>,
    counter: AtomicU32,
}

impl InProcessCheckout {
    pub fn session(&self, id: &str) -> Option<CheckoutSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn mark_paid(&self, id: &str) -> CheckoutSession {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id).expect("unknown session");
        session.state = SessionState::Complete;
        session.payment_state = SessionPaymentState::Paid;
        session.payment_reference = Some(format!("pi_{}", id));
        session.clone()
    }
}

#[async_trait]
impl CheckoutProvider for InProcessCheckout {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> PaymentResult<CheckoutSession> {
        request.validate()?;
        if let Some(existing) = self.by_key.lock().unwrap().get(&request.idempotency_key) {
            if let Some(session) = self.session(existing) {
                return Ok(session);
            }
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_it_{}", n);
        let session = CheckoutSession {
            session_id: id.clone(),
            url: Some(format!("https://checkout.test/pay/{}", id)),
            state: SessionState::Open,
            payment_state: SessionPaymentState::Unpaid,
            amount: Some(request.amount.clone()),
            expires_at: Some(request.expires_at),
            payment_reference: None,
            metadata: request.metadata.clone(),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), session.clone());
        self.by_key
            .lock()
            .unwrap()
            .insert(request.idempotency_key, id);
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        self.session(session_id)
            .ok_or_else(|| PaymentError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let outcome = verify_timestamped_signature(
            payload,
            signature,
            WEBHOOK_SECRET,
            300,
            Utc::now().timestamp(),
        );
        Ok(WebhookVerificationResult {
            valid: outcome.is_ok(),
            reason: outcome.err(),
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<CheckoutEvent> {
        parse_stripe_event(payload)
    }
}

/// Provider-shaped `checkout.session.*` event for `session`.
pub fn session_event(event_id: &str, event_type: &str, session: &CheckoutSession) -> Vec<u8> {
    let body = json!({
        "id": event_id,
        "type": event_type,
        "data": {"object": {
            "id": session.session_id,
            "url": session.url,
            "status": match session.state {
                SessionState::Open => "open",
                SessionState::Complete => "complete",
                SessionState::Expired => "expired",
            },
            "payment_status": match session.payment_state {
                SessionPaymentState::Paid => "paid",
                SessionPaymentState::Unpaid => "unpaid",
                SessionPaymentState::NoPaymentRequired => "no_payment_required",
            },
            "amount_total": session.amount.as_ref().map(|p| p.amount_minor),
            "currency": session.amount.as_ref().map(|p| p.currency.to_lowercase()),
            "expires_at": session.expires_at.map(|t| t.timestamp()),
            "payment_intent": session.payment_reference,
            "metadata": session.metadata,
        }}
    });
    serde_json::to_vec(&body).unwrap()
}

pub fn sign(payload: &[u8]) -> String {
    sign_timestamped_payload(payload, WEBHOOK_SECRET, Utc::now().timestamp())
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub supplier: Arc<ScriptedSupplier>,
    pub checkout: Arc<InProcessCheckout>,
    pub repository: Arc<InMemoryBookingRepository>,
}

pub struct TestOptions {
    pub smart_save_requests_per_window: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            smart_save_requests_per_window: 100,
        }
    }
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(TestOptions::default())
}

pub fn create_test_app_with(options: TestOptions) -> TestApp {
    let supplier_api = Arc::new(ScriptedSupplier::default());
    let tokens = Arc::new(SupplierTokenProvider::new(
        Arc::new(StaticToken),
        Arc::new(InMemoryCache::<SupplierToken>::new(Duration::from_secs(3600))),
        "integration-client",
        ChronoDuration::seconds(30),
    ));
    let supplier = Arc::new(SupplierClient::new(
        supplier_api.clone(),
        tokens,
        RetryPolicy::new(2, Duration::from_millis(1)).with_max_delay(Duration::from_millis(5)),
        "USD",
    ));

    let repository = Arc::new(InMemoryBookingRepository::new());
    let store = BookingStore::new(repository.clone());
    let checkout_provider = Arc::new(InProcessCheckout::default());
    let reconciler = Arc::new(ConfirmationReconciler::new(
        store.clone(),
        checkout_provider.clone(),
    ));
    let checkout = Arc::new(CheckoutSessionOrchestrator::new(
        store.clone(),
        checkout_provider.clone(),
        CheckoutSettings {
            settlement_currency: "USD".to_string(),
            session_ttl: ChronoDuration::minutes(30),
            success_url: "https://app.test/bookings/{BOOKING_ID}/done".to_string(),
            cancel_url: "https://app.test/bookings/{BOOKING_ID}".to_string(),
        },
    ));

    let rate_provider = Arc::new(FixedRateProvider::new());
    let rates = Arc::new(RateCache::new(
        Arc::new(InMemoryCache::<RateSnapshot>::new(Duration::from_secs(900))),
        rate_provider.clone(),
        Duration::from_secs(900),
    ));
    let smart_save = Arc::new(FxSmartSaveEngine::new(
        rates,
        Arc::new(InMemoryCache::<SmartSaveResult>::new(Duration::from_secs(120))),
        Arc::new(InMemoryRateLimiter::new(RateLimitPolicy::new(
            options.smart_save_requests_per_window,
            Duration::from_secs(60),
        ))),
        SmartSaveSettings {
            fee_percent: "1.0".parse().unwrap(),
            min_savings_usd: "1.00".parse().unwrap(),
            result_ttl: Duration::from_secs(120),
        },
    ));

    let state = AppState {
        validator: Arc::new(PrebookingValidator::new(supplier.clone())),
        supplier,
        bookings: Arc::new(ProvisionalBookingManager::new(store, "USD")),
        checkout,
        reconciler,
        smart_save,
    };

    let router = api::router(state)
        .merge(health::router(HealthChecker::new().with_rate_provider(rate_provider)));

    TestApp {
        router,
        supplier: supplier_api,
        checkout: checkout_provider,
        repository,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn deliver_webhook(&self, payload: Vec<u8>, signature: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payments")
                .header("content-type", "application/json")
                .header("stripe-signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
    }

    pub async fn create_booking(&self, client_request_id: &str, offer: &OfferSnapshot) -> (StatusCode, Value) {
        self.post_json(
            "/api/bookings",
            json!({
                "product_type": offer.product_type(),
                "offer": offer,
                "client_request_id": client_request_id,
                "contact": {"full_name": "Ada Traveller", "email": "ada@example.com"},
            }),
        )
        .await
    }

    pub async fn open_checkout(&self, booking_id: &str, key: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(format!("/api/bookings/{}/checkout", booking_id))
                .header("idempotency-key", key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn stored_status(&self, booking_id: &str) -> String {
        let id = Uuid::parse_str(booking_id).unwrap();
        let booking = self.repository.find_by_id(id).await.unwrap().unwrap();
        booking.status.as_str().to_string()
    }
}

pub fn hotel_offer(amount_minor: i64, pay_at_property: bool) -> OfferSnapshot {
    OfferSnapshot::Hotel(HotelOffer {
        offer_id: "HOTEL-IT-1".to_string(),
        hotel_id: "LISHT01".to_string(),
        hotel_name: "Casa do Rio".to_string(),
        city_code: "LIS".to_string(),
        check_in: NaiveDate::from_ymd_opt(2027, 5, 10).unwrap(),
        check_out: NaiveDate::from_ymd_opt(2027, 5, 13).unwrap(),
        room_type: "Twin".to_string(),
        guests: 2,
        pay_at_property,
        price: Price::new(amount_minor, "USD"),
    })
}
