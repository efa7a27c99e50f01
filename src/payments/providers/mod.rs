pub mod stripe;

pub use stripe::{StripeCheckoutProvider, StripeConfig};
