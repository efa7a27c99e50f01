//! Hosted checkout integration

pub mod error;
pub mod provider;
pub mod providers;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::CheckoutProvider;
pub use types::{
    CheckoutEvent, CheckoutEventKind, CheckoutSession, CheckoutSessionRequest, ProviderName,
    SessionPaymentState, SessionState,
};
