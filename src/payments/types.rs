use crate::bookings::types::Price;
use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Stripe,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(ProviderName::Stripe),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Metadata keys attached to every session so webhooks can be traced back.
pub mod metadata {
    pub const BOOKING_ID: &str = "booking_id";
    pub const CLIENT_REQUEST_ID: &str = "client_request_id";
    pub const PREFERRED_CURRENCY: &str = "preferred_currency";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSessionRequest {
    pub booking_id: Uuid,
    /// Forwarded to the provider so a retried create returns the same session
    pub idempotency_key: String,
    pub amount: Price,
    pub description: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSessionRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount.amount_minor <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "idempotency key is required".to_string(),
                field: Some("idempotency_key".to_string()),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Complete,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentState {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

/// Provider view of a hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
    pub state: SessionState,
    pub payment_state: SessionPaymentState,
    pub amount: Option<Price>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider's payment identifier once money moved
    pub payment_reference: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_state,
            SessionPaymentState::Paid | SessionPaymentState::NoPaymentRequired
        )
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata::BOOKING_ID)
            .and_then(|v| Uuid::parse_str(v).ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutEventKind {
    PaymentSucceeded,
    PaymentFailed,
    SessionExpired,
    /// Session completed but an asynchronous payment is still in flight
    PaymentPending,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutEvent {
    pub provider: ProviderName,
    pub event_id: String,
    pub event_type: String,
    pub kind: CheckoutEventKind,
    pub session: Option<CheckoutSession>,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_parses_case_insensitively() {
        assert_eq!("Stripe".parse::<ProviderName>().unwrap(), ProviderName::Stripe);
        assert!("paypal".parse::<ProviderName>().is_err());
    }

    #[test]
    fn session_booking_id_comes_from_metadata() {
        let id = Uuid::new_v4();
        let mut meta = BTreeMap::new();
        meta.insert(metadata::BOOKING_ID.to_string(), id.to_string());
        let session = CheckoutSession {
            session_id: "cs_test_1".to_string(),
            url: None,
            state: SessionState::Complete,
            payment_state: SessionPaymentState::Paid,
            amount: Some(Price::new(1000, "USD")),
            expires_at: None,
            payment_reference: Some("pi_1".to_string()),
            metadata: meta,
        };
        assert_eq!(session.booking_id(), Some(id));
        assert!(session.is_paid());
    }
}
