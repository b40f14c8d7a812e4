//! Periodic sweeper worker.
//!
//! Drives [`ExpirySweeper::sweep_once`] on a fixed interval until a shutdown
//! signal arrives. A pass that fails to list candidates is retried per the
//! [`RetryPolicy`]; a pass that still fails is logged and the worker waits
//! for the next tick.

use crate::retry::{RetryPolicy, retry_transient};
use boxoffice_core::{ExpirySweeper, SweepReport};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Totals across every pass a worker ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Passes that finished
    pub passes: u64,
    /// Passes that failed after retries
    pub failed_passes: u64,
    /// Sum of every finished pass's report
    pub totals: SweepReport,
}

impl WorkerSummary {
    fn record(&mut self, report: &SweepReport) {
        self.passes += 1;
        self.totals.examined += report.examined;
        self.totals.cancelled += report.cancelled;
        self.totals.already_final += report.already_final;
        self.totals.orphans_released += report.orphans_released;
        self.totals.failed += report.failed;
    }
}

/// Background task running the expiry sweeper.
///
/// # Example
///
/// ```ignore
/// let (worker, shutdown) = SweeperWorker::new(sweeper, Duration::from_secs(60));
/// let handle = worker.spawn();
///
/// // In a signal handler:
/// shutdown.send(true).ok();
/// let summary = handle.await?;
/// ```
pub struct SweeperWorker {
    sweeper: ExpirySweeper,
    period: Duration,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl SweeperWorker {
    /// Create a worker and the sender that stops it. Send `true` to stop.
    #[must_use]
    pub fn new(sweeper: ExpirySweeper, period: Duration) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Self {
            sweeper,
            period,
            retry: RetryPolicy::default(),
            shutdown: shutdown_rx,
        };
        (worker, shutdown_tx)
    }

    /// Override the retry policy used for each pass.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run on a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<WorkerSummary> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown. The first pass starts immediately.
    pub async fn run(mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(period_secs = self.period.as_secs(), "Sweeper worker started");

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let sweeper = &self.sweeper;
                    match retry_transient(&self.retry, || sweeper.sweep_once()).await {
                        Ok(report) => summary.record(&report),
                        Err(error) => {
                            summary.failed_passes += 1;
                            tracing::error!(%error, "Sweep pass failed");
                        }
                    }
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            passes = summary.passes,
            cancelled = summary.totals.cancelled,
            orphans_released = summary.totals.orphans_released,
            "Sweeper worker stopped"
        );
        summary
    }
}
