//! Persistence seam for ticket inventory.
//!
//! # Design
//!
//! Each method of [`InventoryStore`] is one all-or-nothing transaction. The
//! services in this crate never compose several store calls into a
//! read-modify-write cycle on `sold`; anything that touches the counter is a
//! single store call that takes the row's serialization point, applies
//! [`TicketType::apply_delta`], and commits.
//!
//! # Implementations
//!
//! - `PostgresInventoryStore` (in `boxoffice-postgres`): `SELECT … FOR UPDATE`
//!   row locks inside a sqlx transaction
//! - `InMemoryInventoryStore` (in `boxoffice-testing`): one mutex around all
//!   tables, for fast deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! store can be shared as `Arc<dyn InventoryStore>`. Arguments are owned so
//! the returned future only borrows `self`.

use crate::error::InventoryError;
use crate::types::{
    EventId, NewReservation, Order, OrderId, OrderNumber, Reservation, ReservationId, Ticket,
    TicketSpec, TicketType, TicketTypeId, TicketTypeUpdate,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, InventoryError>> + Send + 'a>>;

/// Result of releasing a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Units went back to the pool; carries the updated ticket type.
    Released(TicketType),
    /// Reservation had already been released; nothing changed.
    AlreadyReleased,
}

/// Result of a conditional `pending → cancelled` update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// This call cancelled the order and released `released_units`.
    Cancelled {
        /// Order after the update
        order: Order,
        /// Units returned to the pool
        released_units: u32,
    },
    /// The order had already left `pending`; nothing changed.
    NotPending(Order),
}

/// Result of a fulfillment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// This call completed the order and minted the tickets.
    Completed {
        /// Order after the update
        order: Order,
        /// Minted tickets
        tickets: Vec<Ticket>,
    },
    /// The order was already completed with the same payment reference.
    AlreadyCompleted {
        /// Order as stored
        order: Order,
        /// Tickets minted by the earlier call
        tickets: Vec<Ticket>,
    },
}

impl FulfillmentOutcome {
    /// The order, whichever call completed it.
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Completed { order, .. } | Self::AlreadyCompleted { order, .. } => order,
        }
    }

    /// The tickets, whichever call minted them.
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        match self {
            Self::Completed { tickets, .. } | Self::AlreadyCompleted { tickets, .. } => tickets,
        }
    }

    /// Whether this call did the work.
    #[must_use]
    pub const fn is_first_completion(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Order row plus the reservations to attach to it.
#[derive(Debug, Clone)]
pub struct OrderInsert {
    /// Fully built order, `status = pending`
    pub order: Order,
    /// Held reservations to attach
    pub reservation_ids: Vec<ReservationId>,
}

/// Everything the fulfillment transaction needs.
#[derive(Debug, Clone)]
pub struct FulfillmentRequest {
    /// Order to complete
    pub order_id: OrderId,
    /// Reference reported by the payment gateway
    pub payment_reference: String,
    /// One entry per unit to mint
    pub specs: Vec<TicketSpec>,
    /// Tickets to insert, built by the caller from `specs`
    pub tickets: Vec<Ticket>,
    /// Transaction timestamp
    pub now: DateTime<Utc>,
}

/// Transactional storage for ticket types, reservations, orders and tickets.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request task and the sweeper.
pub trait InventoryStore: Send + Sync {
    // ------------------------------------------------------------------
    // Ticket types
    // ------------------------------------------------------------------

    /// Insert a new ticket type.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, TicketType>;

    /// Load a ticket type.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>>;

    /// All ticket types of an event, ordered by name.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn ticket_types_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<TicketType>>;

    /// Apply a partial update under the row lock via [`TicketType::apply_update`].
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketTypeNotFound`], [`InventoryError::QuantityBelowSold`],
    /// validation, storage or transient errors.
    fn update_ticket_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> StoreFuture<'_, TicketType>;

    /// Delete a ticket type with nothing sold.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketTypeNotFound`], [`InventoryError::TicketTypeHasSales`],
    /// storage or transient errors.
    fn delete_ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, ()>;

    /// The one adjustment primitive for `sold`.
    ///
    /// With `expected_version` the adjustment is a compare-and-swap; without
    /// it the store applies the delta under its serialization point.
    ///
    /// # Errors
    ///
    /// [`InventoryError::VersionConflict`], [`InventoryError::InsufficientStock`],
    /// [`InventoryError::InventoryUnderflow`], not found, storage or transient errors.
    fn adjust_inventory(
        &self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> StoreFuture<'_, TicketType>;

    /// Sum of held reservation quantities for a ticket type.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn held_quantity(&self, id: TicketTypeId) -> StoreFuture<'_, u32>;

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    /// Lock the ticket type, run [`TicketType::check_reservable`], add the
    /// quantity to `sold` and insert a held reservation.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InsufficientStock`], [`InventoryError::SaleNotStarted`],
    /// [`InventoryError::SaleEnded`], not found, storage or transient errors.
    fn hold_inventory(
        &self,
        reservation: NewReservation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Reservation>;

    /// Return a held reservation's units to the pool.
    ///
    /// The reservation must not be attached to an order; that check runs
    /// under the reservation's row lock.
    ///
    /// # Errors
    ///
    /// [`InventoryError::ReservationNotFound`], [`InventoryError::ReservationMismatch`]
    /// for consumed or attached reservations, storage or transient errors.
    fn release_reservation(&self, id: ReservationId) -> StoreFuture<'_, ReleaseOutcome>;

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Reservations attached to an order.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn reservations_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Reservation>>;

    /// Held reservations never attached to an order whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn expired_orphan_reservations(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<ReservationId>>;

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Insert a pending order and attach its reservations.
    ///
    /// # Errors
    ///
    /// [`InventoryError::DuplicateOrderNumber`] when the number is taken,
    /// [`InventoryError::ReservationMismatch`] when a reservation is not
    /// attachable, storage or transient errors.
    fn insert_order(&self, insert: OrderInsert) -> StoreFuture<'_, Order>;

    /// Load an order.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn order(&self, id: OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Load an order by its number.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn order_by_number(&self, number: OrderNumber) -> StoreFuture<'_, Option<Order>>;

    /// Conditional `pending → cancelled` that also releases the order's held
    /// reservations.
    ///
    /// # Errors
    ///
    /// [`InventoryError::OrderNotFound`], storage or transient errors.
    fn cancel_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, CancelOutcome>;

    /// Conditional `pending → completed` plus ticket inserts, all or nothing.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`],
    /// [`InventoryError::PaymentReferenceConflict`],
    /// [`InventoryError::ReservationMismatch`], not found, storage or transient errors.
    fn complete_order(&self, request: FulfillmentRequest) -> StoreFuture<'_, FulfillmentOutcome>;

    /// Conditional `completed → refunded`; the order's tickets become refunded.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`], not found, storage or transient errors.
    fn refund_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, Order>;

    /// Delete a ticket-less pending order, releasing its held reservations.
    ///
    /// # Errors
    ///
    /// [`InventoryError::OrderNotDeletable`], not found, storage or transient errors.
    fn delete_order(&self, id: OrderId) -> StoreFuture<'_, ()>;

    /// Pending orders created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn stale_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<OrderId>>;

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    /// Tickets owned by an order.
    ///
    /// # Errors
    ///
    /// Storage or transient errors.
    fn tickets_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Mark an active ticket as used.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketNotFound`], [`InventoryError::InvalidTicketState`],
    /// storage or transient errors.
    fn redeem_ticket(&self, qr_code: String) -> StoreFuture<'_, Ticket>;
}
