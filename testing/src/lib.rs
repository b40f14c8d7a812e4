//! # Box Office Testing
//!
//! Testing utilities for Box Office.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: the full store contract behind one mutex
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`MockPaymentGateway`] recording every payment session it opens
//! - Fixtures and proptest strategies for ticket inventory
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::ReservationManager;
//! use boxoffice_core::store::InventoryStore;
//! use boxoffice_core::types::{EventId, UserId};
//! use boxoffice_testing::{InMemoryInventoryStore, fixtures, test_clock};
//! use boxoffice_core::environment::Clock;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = Arc::new(test_clock());
//! let store = Arc::new(InMemoryInventoryStore::new());
//! let ticket_type = fixtures::ticket_type_on_sale(EventId::new(), 100, clock.now());
//! store.insert_ticket_type(ticket_type.clone()).await?;
//!
//! let reservations = ReservationManager::new(store.clone(), clock);
//! let token = reservations.reserve(ticket_type.id, 2, UserId::new(), None).await?;
//! assert_eq!(token.quantity, 2);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use boxoffice_core::environment::Clock;

pub mod inventory_store;
pub mod payment;

pub use inventory_store::{InMemoryInventoryStore, StoreOp};
pub use payment::MockPaymentGateway;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// services and keep another to advance it.
    ///
    /// ```
    /// use boxoffice_testing::mocks::ManualClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(16));
    /// assert_eq!(clock.now() - start, Duration::minutes(16));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }

        /// Jump to an absolute time.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC, the start of every test timeline.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Builders for common test data.
pub mod fixtures {
    use boxoffice_core::types::{
        BillingDetails, EventId, Money, NewTicketType, SaleWindow, TicketType, TicketTypeId,
    };
    use chrono::{DateTime, Duration, Utc};

    /// Price used by [`ticket_type_on_sale`], in minor units.
    pub const DEFAULT_PRICE: u64 = 3750;

    /// Ticket type whose sale opened a day before `now` and runs a week.
    #[must_use]
    pub fn ticket_type_on_sale(event_id: EventId, quantity: u32, now: DateTime<Utc>) -> TicketType {
        let start = now - Duration::days(1);
        TicketType {
            id: TicketTypeId::new(),
            event_id,
            name: format!("General Admission {quantity}"),
            price: Money::from_minor(DEFAULT_PRICE),
            quantity,
            sold: 0,
            sale_window: sale_window(start, start + Duration::days(7)),
            version: 0,
        }
    }

    /// Creation input for a ticket type on sale around `now`.
    #[must_use]
    pub fn new_ticket_type(event_id: EventId, name: &str, quantity: i64, now: DateTime<Utc>) -> NewTicketType {
        NewTicketType {
            event_id,
            name: name.to_string(),
            price: i64::try_from(DEFAULT_PRICE).unwrap_or(i64::MAX),
            quantity,
            sale_start: now - Duration::days(1),
            sale_end: now + Duration::days(6),
        }
    }

    /// Billing details that pass validation.
    #[must_use]
    pub fn billing() -> BillingDetails {
        BillingDetails {
            email: "ada@example.com".to_string(),
            name: "Ada Lovelace".to_string(),
        }
    }

    #[allow(clippy::expect_used)]
    fn sale_window(start: DateTime<Utc>, end: DateTime<Utc>) -> SaleWindow {
        SaleWindow::new(start, end).expect("fixture window is a week long")
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Capacity of a ticket type under test.
    pub fn capacity() -> impl Strategy<Value = u32> {
        1u32..=200
    }

    /// A burst of reservation quantities, possibly asking for more than exists.
    pub fn reservation_burst() -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(1u32..=40, 1..24)
    }

    /// Interleaved reserve (`true`) and release (`false`) steps.
    pub fn reserve_release_script() -> impl Strategy<Value = Vec<(bool, u32)>> {
        prop::collection::vec((any::<bool>(), 1u32..=10), 1..40)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_epoch());
        let handle = clock.clone();
        handle.advance(chrono::Duration::minutes(16));
        assert_eq!(clock.now(), test_epoch() + chrono::Duration::minutes(16));
    }
}
