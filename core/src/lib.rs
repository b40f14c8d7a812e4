//! # Box Office Core
//!
//! Ticket inventory for events: sellable ticket types, time-boxed
//! reservations, a strict order lifecycle, and the atomic fulfillment step
//! that turns a paid order into redeemable tickets.
//!
//! ## Components
//!
//! ```text
//! ┌─────────────────┐   ┌─────────────────────┐   ┌──────────────────────┐
//! │ TicketTypeLedger│   │ ReservationManager  │   │  OrderStateMachine   │
//! └────────┬────────┘   └──────────┬──────────┘   └──────────┬───────────┘
//!          │                       │                         │
//!          │    ┌──────────────────┴──────┐   ┌──────────────┴───────────┐
//!          │    │       Fulfillment       │   │      ExpirySweeper       │
//!          │    └────────────┬────────────┘   └──────────────┬───────────┘
//!          └─────────────────┴──────────────┬────────────────┘
//!                                           ▼
//!                               ┌───────────────────────┐
//!                               │  dyn InventoryStore   │
//!                               └───────────────────────┘
//! ```
//!
//! Every store method is one all-or-nothing transaction. The services in this
//! crate validate input before any I/O, delegate the atomic part to the store,
//! and record logs and metrics around it.
//!
//! ## The `sold` counter
//!
//! `TicketType::sold` is the only contended resource. Every change to it goes
//! through [`TicketType::apply_delta`], which both store backends call from
//! inside their serialization point (a row lock in `PostgreSQL`, a mutex in
//! memory). `sold` counts units that are held or issued; it is never allowed to
//! exceed `quantity` or drop below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod order;
pub mod payment;
pub mod reservation;
pub mod store;
pub mod sweeper;
pub mod types;

pub use error::{ErrorKind, InventoryError, Result};
pub use fulfillment::Fulfillment;
pub use ledger::TicketTypeLedger;
pub use order::OrderStateMachine;
pub use reservation::ReservationManager;
pub use store::InventoryStore;
pub use sweeper::{ExpirySweeper, SweepReport};

/// Environment module - Injected dependencies
///
/// Services take their collaborators as trait objects so production code and
/// tests can swap implementations without touching business logic.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use boxoffice_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
