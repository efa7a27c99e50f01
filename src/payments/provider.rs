use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CheckoutEvent, CheckoutSession, CheckoutSessionRequest, ProviderName,
    WebhookVerificationResult,
};
use async_trait::async_trait;

/// Hosted checkout provider. Card data never touches this service.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Must be idempotent on `request.idempotency_key`.
    async fn create_session(&self, request: CheckoutSessionRequest)
        -> PaymentResult<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession>;

    fn name(&self) -> ProviderName;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<CheckoutEvent>;
}
