use crate::bookings::types::Price;
use crate::config::CheckoutConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::CheckoutProvider;
use crate::payments::types::{
    CheckoutEvent, CheckoutEventKind, CheckoutSession, CheckoutSessionRequest, ProviderName,
    SessionPaymentState, SessionState, WebhookVerificationResult,
};
use crate::payments::utils::{verify_timestamped_signature, PaymentHttpClient, RequestBody};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub webhook_tolerance_secs: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl From<&CheckoutConfig> for StripeConfig {
    fn from(config: &CheckoutConfig) -> Self {
        Self {
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            webhook_tolerance_secs: config.webhook_tolerance_secs,
            timeout_secs: config.request_timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

pub struct StripeCheckoutProvider {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeCheckoutProvider {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "stripe",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.booking_id.to_string()),
            ("expires_at".to_string(), request.expires_at.timestamp().to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.amount.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.amount_minor.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
            form.push((
                format!("payment_intent_data[metadata][{}]", key),
                value.clone(),
            ));
        }
        form
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckoutProvider {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> PaymentResult<CheckoutSession> {
        request.validate()?;
        let form = Self::session_form(&request);

        let response: StripeSession = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                &self.config.secret_key,
                RequestBody::Form(&form),
                &[("Idempotency-Key", request.idempotency_key.as_str())],
            )
            .await?;

        info!(
            booking_id = %request.booking_id,
            session_id = %response.id,
            "stripe checkout session created"
        );
        response.into_session()
    }

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        if session_id.trim().is_empty() || session_id.contains('/') {
            return Err(PaymentError::ValidationError {
                message: "invalid checkout session id".to_string(),
                field: Some("session_id".to_string()),
            });
        }

        let result: PaymentResult<StripeSession> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/checkout/sessions/{}", session_id)),
                &self.config.secret_key,
                RequestBody::Empty,
                &[],
            )
            .await;

        match result {
            Ok(session) => session.into_session(),
            Err(PaymentError::ProviderError {
                provider_code: Some(code),
                ..
            }) if code == "404" => Err(PaymentError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
            Err(e) => Err(e),
        }
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
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
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

pub fn parse_stripe_event(payload: &[u8]) -> PaymentResult<CheckoutEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| PaymentError::WebhookVerificationError {
            message: format!("invalid webhook JSON payload: {}", e),
        })?;
    let envelope: StripeEvent =
        serde_json::from_value(parsed.clone()).map_err(|e| PaymentError::ValidationError {
            message: format!("unexpected webhook shape: {}", e),
            field: None,
        })?;

    let kind = match envelope.event_type.as_str() {
        "checkout.session.completed" => None,
        "checkout.session.async_payment_succeeded" => Some(CheckoutEventKind::PaymentSucceeded),
        "checkout.session.async_payment_failed" => Some(CheckoutEventKind::PaymentFailed),
        "checkout.session.expired" => Some(CheckoutEventKind::SessionExpired),
        _ => Some(CheckoutEventKind::Ignored),
    };

    let session = if envelope.event_type.starts_with("checkout.session.") {
        let raw: StripeSession = serde_json::from_value(envelope.data.object).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("invalid checkout session object: {}", e),
                field: Some("data.object".to_string()),
            }
        })?;
        Some(raw.into_session()?)
    } else {
        None
    };

    // completed fires for delayed payment methods before the money settles
    let kind = kind.unwrap_or_else(|| match &session {
        Some(s) if s.is_paid() => CheckoutEventKind::PaymentSucceeded,
        _ => CheckoutEventKind::PaymentPending,
    });

    Ok(CheckoutEvent {
        provider: ProviderName::Stripe,
        event_id: envelope.id,
        event_type: envelope.event_type,
        kind,
        session,
        payload: parsed,
        received_at: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: JsonValue,
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: String,
    amount_total: Option<i64>,
    currency: Option<String>,
    expires_at: Option<i64>,
    /// Either an id string or an expanded object
    payment_intent: Option<JsonValue>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl StripeSession {
    fn into_session(self) -> PaymentResult<CheckoutSession> {
        let state = match self.status.as_deref() {
            Some("open") => SessionState::Open,
            Some("complete") => SessionState::Complete,
            Some("expired") => SessionState::Expired,
            other => {
                return Err(PaymentError::ProviderError {
                    provider: "stripe".to_string(),
                    message: format!("unknown session status {:?}", other),
                    provider_code: None,
                    retryable: false,
                })
            }
        };
        let payment_state = match self.payment_status.as_str() {
            "paid" => SessionPaymentState::Paid,
            "no_payment_required" => SessionPaymentState::NoPaymentRequired,
            _ => SessionPaymentState::Unpaid,
        };
        let amount = match (self.amount_total, self.currency) {
            (Some(total), Some(currency)) => Some(Price::new(total, currency)),
            _ => None,
        };
        let payment_reference = self.payment_intent.and_then(|pi| match pi {
            JsonValue::String(id) => Some(id),
            JsonValue::Object(obj) => obj.get("id").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        });

        Ok(CheckoutSession {
            session_id: self.id,
            url: self.url,
            state,
            payment_state,
            amount,
            expires_at: self.expires_at.and_then(unix_to_utc),
            payment_reference,
            metadata: self.metadata,
        })
    }
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
