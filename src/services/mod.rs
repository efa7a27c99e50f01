//! Services module for business logic and integrations
//!
//! Booking pipeline: `prebooking` → `provisional_booking` → `checkout` →
//! `confirmation`, all writing through `booking_store`. FX: `rate_cache` fed
//! by `rate_providers`, consumed by `smart_save` behind `rate_limiter`.

pub mod booking_store;
pub mod checkout;
pub mod confirmation;
pub mod prebooking;
pub mod provisional_booking;
pub mod rate_cache;
pub mod rate_limiter;
pub mod rate_providers;
pub mod smart_save;

pub use booking_store::{Applied, BookingError, BookingStore};
pub use checkout::{CheckoutError, CheckoutSessionOrchestrator, CheckoutSessionView, CheckoutSettings};
pub use confirmation::{
    BookingStatusView, ConfirmationError, ConfirmationReconciler, ConfirmationSource,
    WebhookOutcome,
};
pub use prebooking::{PrebookingError, PrebookingResult, PrebookingValidator, ValidatedOffer, ValidationCode};
pub use provisional_booking::ProvisionalBookingManager;
pub use rate_cache::{RateCache, RateError, RateProvider, RateSnapshot};
#[cfg(feature = "cache")]
pub use rate_limiter::RedisRateLimiter;
pub use rate_limiter::{InMemoryRateLimiter, RateDecision, RateLimitPolicy, RateLimiter};
pub use rate_providers::{FixedRateProvider, HttpRateProvider};
pub use smart_save::{
    FxQuote, FxSmartSaveEngine, PriceOption, SmartSaveError, SmartSaveRequest, SmartSaveResult,
    SmartSaveSettings,
};
