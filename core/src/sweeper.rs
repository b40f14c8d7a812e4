//! Expiry Sweeper.
//!
//! Cancels pending orders older than the reservation TTL and releases orphan
//! holds whose expiry has passed. Cancellation uses the same conditional
//! `pending → cancelled` store path as a user cancel, so a sweep racing a late
//! payment confirmation leaves exactly one winner.

use crate::environment::Clock;
use crate::error::{InventoryError, Result};
use crate::reservation::DEFAULT_RESERVATION_TTL_SECS;
use crate::store::{CancelOutcome, InventoryStore, ReleaseOutcome};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Default number of rows fetched per batch.
pub const DEFAULT_SWEEP_BATCH_SIZE: u32 = 100;

/// Tally of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Stale orders and orphan holds looked at
    pub examined: u64,
    /// Orders this pass cancelled
    pub cancelled: u64,
    /// Candidates another path finalized first
    pub already_final: u64,
    /// Orphan holds this pass released
    pub orphans_released: u64,
    /// Candidates that failed and will be retried next pass
    pub failed: u64,
}

impl SweepReport {
    /// Whether the pass changed anything.
    #[must_use]
    pub const fn reclaimed_anything(&self) -> bool {
        self.cancelled > 0 || self.orphans_released > 0
    }
}

/// Reclaims inventory from abandoned checkouts.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    batch_size: u32,
}

impl ExpirySweeper {
    /// Creates a new `ExpirySweeper` with the default TTL and batch size
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
            batch_size: DEFAULT_SWEEP_BATCH_SIZE,
        }
    }

    /// Age after which a pending order counts as abandoned.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Rows fetched per batch. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one pass.
    ///
    /// Failures on individual orders or holds are logged and counted in
    /// [`SweepReport::failed`]; they do not abort the pass.
    ///
    /// # Errors
    ///
    /// Only when listing candidates fails.
    #[tracing::instrument(skip(self), fields(ttl_secs = self.ttl.num_seconds()))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.sweep_orders(now - self.ttl, &mut report).await?;
        self.sweep_orphans(now, &mut report).await?;

        metrics::counter!("sweeper_runs_total").increment(1);
        metrics::histogram!("sweeper_pass_duration_seconds").record(started.elapsed().as_secs_f64());

        if report.reclaimed_anything() || report.failed > 0 {
            tracing::info!(
                examined = report.examined,
                cancelled = report.cancelled,
                already_final = report.already_final,
                orphans_released = report.orphans_released,
                failed = report.failed,
                "Sweep pass finished"
            );
        } else {
            tracing::debug!(examined = report.examined, "Sweep pass found nothing to reclaim");
        }
        Ok(report)
    }

    async fn sweep_orders(
        &self,
        cutoff: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        loop {
            let batch = self.store.stale_pending_orders(cutoff, self.batch_size).await?;
            let full_batch = batch.len() >= self.batch_size as usize;
            let mut progressed = false;

            for order_id in batch {
                report.examined += 1;
                match self.store.cancel_order(order_id, self.clock.now()).await {
                    Ok(CancelOutcome::Cancelled { released_units, .. }) => {
                        progressed = true;
                        report.cancelled += 1;
                        metrics::counter!("orders_cancelled_total", "reason" => "expired").increment(1);
                        tracing::info!(order_id = %order_id, released_units, "Expired order cancelled");
                    }
                    Ok(CancelOutcome::NotPending(order)) => {
                        progressed = true;
                        report.already_final += 1;
                        tracing::debug!(order_id = %order_id, status = %order.status, "Order finalized before sweep");
                    }
                    Err(InventoryError::OrderNotFound(_)) => {
                        progressed = true;
                        report.already_final += 1;
                    }
                    Err(error) => {
                        report.failed += 1;
                        metrics::counter!("sweeper_failures_total").increment(1);
                        tracing::warn!(order_id = %order_id, %error, "Failed to cancel expired order");
                    }
                }
            }

            if !full_batch || !progressed {
                return Ok(());
            }
        }
    }

    async fn sweep_orphans(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        loop {
            let batch = self
                .store
                .expired_orphan_reservations(now, self.batch_size)
                .await?;
            let full_batch = batch.len() >= self.batch_size as usize;
            let mut progressed = false;

            for reservation_id in batch {
                report.examined += 1;
                match self.store.release_reservation(reservation_id).await {
                    Ok(ReleaseOutcome::Released(ticket_type)) => {
                        progressed = true;
                        report.orphans_released += 1;
                        metrics::counter!("inventory_releases_total").increment(1);
                        tracing::info!(
                            reservation_id = %reservation_id,
                            ticket_type_id = %ticket_type.id,
                            "Orphan hold released"
                        );
                    }
                    Ok(ReleaseOutcome::AlreadyReleased) => {
                        progressed = true;
                        report.already_final += 1;
                    }
                    // Attached to an order or consumed since it was listed
                    Err(InventoryError::ReservationMismatch(reason)) => {
                        progressed = true;
                        report.already_final += 1;
                        tracing::debug!(reservation_id = %reservation_id, %reason, "Orphan hold no longer releasable");
                    }
                    Err(error) => {
                        report.failed += 1;
                        metrics::counter!("sweeper_failures_total").increment(1);
                        tracing::warn!(reservation_id = %reservation_id, %error, "Failed to release orphan hold");
                    }
                }
            }

            if !full_batch || !progressed {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_reclaims_nothing() {
        let report = SweepReport::default();
        assert!(!report.reclaimed_anything());
        assert!(
            SweepReport {
                orphans_released: 1,
                ..SweepReport::default()
            }
            .reclaimed_anything()
        );
    }
}
