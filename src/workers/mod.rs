//! Background workers

pub mod pending_reconciler;

pub use pending_reconciler::{CycleSummary, PendingReconcilerConfig, PendingReconcilerWorker};
