//! In-process checkout provider for unit tests

use crate::bookings::types::Price;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::CheckoutProvider;
use crate::payments::providers::stripe::parse_stripe_event;
use crate::payments::types::{
    CheckoutEvent, CheckoutSession, CheckoutSessionRequest, ProviderName, SessionPaymentState,
    SessionState, WebhookVerificationResult,
};
use crate::payments::utils::{sign_timestamped_payload, verify_timestamped_signature};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub const WEBHOOK_SECRET: &str = "whsec_test";

#[derive(Default)]
pub struct MockCheckoutProvider {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    by_key: Mutex<HashMap<String, String>>,
    created: Mutex<Vec<CheckoutSessionRequest>>,
    counter: AtomicU32,
    retrieve_calls: AtomicU32,
    unreachable: AtomicBool,
}

impl MockCheckoutProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<CheckoutSessionRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn retrieve_calls(&self) -> u32 {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn session(&self, id: &str) -> Option<CheckoutSession> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn set_state(&self, id: &str, state: SessionState) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.state = state;
        }
    }

    /// Complete the session as paid for `amount` (defaults to the requested amount).
    pub fn mark_paid(&self, id: &str, amount: Option<Price>) -> Option<CheckoutSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id)?;
        session.state = SessionState::Complete;
        session.payment_state = SessionPaymentState::Paid;
        session.payment_reference = Some(format!("pi_{}", id));
        if amount.is_some() {
            session.amount = amount;
        }
        Some(session.clone())
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckoutProvider for MockCheckoutProvider {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> PaymentResult<CheckoutSession> {
        request.validate()?;
        self.created.lock().unwrap().push(request.clone());

        if let Some(existing) = self.by_key.lock().unwrap().get(&request.idempotency_key) {
            if let Some(session) = self.sessions.lock().unwrap().get(existing) {
                return Ok(session.clone());
            }
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
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
            .insert(request.idempotency_key.clone(), id);
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "connection refused".to_string(),
            });
        }
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
        let outcome =
            verify_timestamped_signature(payload, signature, WEBHOOK_SECRET, 300, Utc::now().timestamp());
        Ok(WebhookVerificationResult {
            valid: outcome.is_ok(),
            reason: outcome.err(),
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<CheckoutEvent> {
        parse_stripe_event(payload)
    }
}

/// Provider-shaped webhook body for `session`.
pub fn event_payload(event_id: &str, event_type: &str, session: &CheckoutSession) -> Vec<u8> {
    let status = match session.state {
        SessionState::Open => "open",
        SessionState::Complete => "complete",
        SessionState::Expired => "expired",
    };
    let payment_status = match session.payment_state {
        SessionPaymentState::Paid => "paid",
        SessionPaymentState::Unpaid => "unpaid",
        SessionPaymentState::NoPaymentRequired => "no_payment_required",
    };
    let body = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": {"object": {
            "id": session.session_id,
            "url": session.url,
            "status": status,
            "payment_status": payment_status,
            "amount_total": session.amount.as_ref().map(|p| p.amount_minor),
            "currency": session.amount.as_ref().map(|p| p.currency.to_lowercase()),
            "expires_at": session.expires_at.map(|t| t.timestamp()),
            "payment_intent": session.payment_reference,
            "metadata": session.metadata,
        }}
    });
    serde_json::to_vec(&body).unwrap_or_default()
}

pub fn sign(payload: &[u8]) -> String {
    sign_timestamped_payload(payload, WEBHOOK_SECRET, Utc::now().timestamp())
}
