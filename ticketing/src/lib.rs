//! Box Office ticketing service.
//!
//! Wires the inventory services from `boxoffice-core` to configuration, the
//! `PostgreSQL` store and a payment gateway:
//!
//! - [`config`]: environment-driven settings
//! - [`checkout`]: the checkout coordinator (reserve, order, pay, fulfill)
//!
//! The `sweeper` binary runs the expiry sweeper as a standalone daemon.
//!
//! # Purchase Flow
//!
//! ```text
//! reserve ──► order (pending) ──► payment ──► completed + tickets
//!    │              │
//!    └── expiry ────┴──► cancelled, units back in the pool
//! ```
//!
//! `sold` on a ticket type counts every unit held by a live reservation or
//! issued as a ticket, and never exceeds `quantity`, no matter how many
//! buyers race for the last units.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod checkout;
pub mod config;

pub use checkout::{
    CheckoutError, CheckoutLine, CheckoutRequest, CheckoutService, CheckoutSession,
    ConfirmationOutcome,
};
pub use config::{Config, ConfigError};
