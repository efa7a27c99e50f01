//! Persistence: booking repository plus the Postgres pool it runs on

pub mod booking_repository;
pub mod error;
#[cfg(feature = "database")]
pub mod pool;

pub use booking_repository::{BookingRepository, InMemoryBookingRepository};
#[cfg(feature = "database")]
pub use booking_repository::PgBookingRepository;
pub use error::{DatabaseError, DatabaseErrorKind, DatabaseResult};
#[cfg(feature = "database")]
pub use pool::{health_check, init_pool, init_pool_from_config, run_migrations, PoolConfig};
