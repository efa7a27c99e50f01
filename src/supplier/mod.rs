//! Travel supplier integration: bearer tokens, search and repricing

pub mod client;
pub mod error;
pub mod http;
pub mod retry;
pub mod token;
pub mod types;

pub use client::{FlexibleMatch, SupplierApi, SupplierClient, SupplierOutcome};
pub use error::{SupplierError, SupplierResult};
pub use http::HttpSupplierApi;
pub use retry::{RetryOutcome, RetryPolicy};
pub use token::{ClientCredentialsSource, SupplierToken, SupplierTokenProvider, TokenSource};
pub use types::{CarSearch, FlightSearch, HotelSearch, SearchParams};
