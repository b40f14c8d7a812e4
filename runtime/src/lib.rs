//! # Box Office Runtime
//!
//! Runtime pieces around the inventory services:
//!
//! - [`retry`]: exponential backoff for transient store errors
//! - [`worker`]: the periodic expiry sweeper with graceful shutdown
//! - [`metrics`]: Prometheus recorder, metric descriptions and scrape endpoint

pub mod metrics;
pub mod retry;
pub mod worker;

pub use self::metrics::{MetricsError, MetricsServer};
pub use retry::{RetryPolicy, retry_transient};
pub use worker::{SweeperWorker, WorkerSummary};
