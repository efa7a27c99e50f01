use crate::database::BookingRepository;
use crate::services::{ConfirmationReconciler, ConfirmationSource};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PendingReconcilerConfig {
    /// How often the worker wakes up to check open checkout sessions.
    pub poll_interval: Duration,
    /// Maximum number of pending bookings reconciled per cycle.
    pub batch_size: i64,
}

impl Default for PendingReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 50,
        }
    }
}

impl PendingReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECONCILER_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECONCILER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Catches payments whose webhook never arrived and whose customer stopped
/// polling, by asking the provider about every pending booking that holds a
/// checkout session.
pub struct PendingReconcilerWorker {
    repository: Arc<dyn BookingRepository>,
    reconciler: Arc<ConfirmationReconciler>,
    config: PendingReconcilerConfig,
}

impl PendingReconcilerWorker {
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        reconciler: Arc<ConfirmationReconciler>,
        config: PendingReconcilerConfig,
    ) -> Self {
        Self {
            repository,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "pending booking reconciler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("pending booking reconciler stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(summary) if summary.examined > 0 => info!(
                            examined = summary.examined,
                            confirmed = summary.confirmed,
                            failed = summary.failed,
                            "reconciliation cycle finished"
                        ),
                        Ok(_) => debug!("no pending checkout sessions"),
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("pending booking reconciler stopped");
    }

    /// One pass over the current batch. Individual failures are logged and
    /// counted; only failing to list the batch is an error.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        let pending = self
            .repository
            .list_pending_with_session(self.config.batch_size)
            .await?;

        let results = join_all(pending.iter().map(|booking| {
            self.reconciler
                .reconcile(booking.id, ConfirmationSource::Worker)
        }))
        .await;

        let mut summary = CycleSummary {
            examined: pending.len(),
            ..Default::default()
        };
        for (booking, result) in pending.iter().zip(results) {
            match result {
                Ok(updated) if updated.status.is_confirmed() => summary.confirmed += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(booking_id = %booking.id, error = %e, "failed to reconcile booking");
                }
            }
        }
        Ok(summary)
    }
}
