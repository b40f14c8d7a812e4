//! Error types shared by every inventory operation.
//!
//! Errors fall into a small number of kinds (see [`ErrorKind`]) that tell the
//! caller what to do next: fix the input, show the user a message, re-fetch
//! state, or retry the whole operation.

use crate::types::{OrderId, OrderStatus, ReservationId, TicketId, TicketStatus, TicketTypeId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Coarse classification of an [`InventoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any I/O.
    Validation,
    /// Expected business outcome (no stock, sale window closed).
    Business,
    /// The entity does not exist.
    NotFound,
    /// State moved on; re-fetch before deciding what to do.
    Conflict,
    /// Contention or connectivity; the whole operation may be retried.
    Transient,
    /// Non-retryable backend failure.
    Storage,
}

/// Errors that can occur during inventory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ticket type does not exist.
    #[error("Ticket type not found: {0}")]
    TicketTypeNotFound(TicketTypeId),

    /// Order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Reservation does not exist.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Ticket does not exist.
    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    /// Not enough unsold units to satisfy the request.
    #[error("Insufficient stock for {ticket_type_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Ticket type that ran out.
        ticket_type_id: TicketTypeId,
        /// Units requested.
        requested: u32,
        /// Units available at the time of the check.
        available: u32,
    },

    /// The sale window has not opened yet.
    #[error("Sale has not started (opens at {starts_at})")]
    SaleNotStarted {
        /// When the sale opens.
        starts_at: DateTime<Utc>,
    },

    /// The sale window has closed.
    #[error("Sale has ended (closed at {ended_at})")]
    SaleEnded {
        /// When the sale closed.
        ended_at: DateTime<Utc>,
    },

    /// The order cannot move from its current status to the requested one.
    #[error("Invalid state transition for order {order_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// Order that was asked to transition.
        order_id: OrderId,
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// The ticket cannot move from its current status to the requested one.
    #[error("Invalid ticket state for {ticket_id}: {from} -> {to}")]
    InvalidTicketState {
        /// Ticket that was asked to transition.
        ticket_id: TicketId,
        /// Current status.
        from: TicketStatus,
        /// Requested status.
        to: TicketStatus,
    },

    /// Quantity update would drop below units already sold.
    #[error("Quantity {quantity} is below the {sold} units already sold")]
    QuantityBelowSold {
        /// Requested quantity.
        quantity: u32,
        /// Units already sold.
        sold: u32,
    },

    /// Adjustment would drive `sold` below zero.
    #[error("Inventory underflow on {ticket_type_id}: sold {sold}, delta {delta}")]
    InventoryUnderflow {
        /// Ticket type.
        ticket_type_id: TicketTypeId,
        /// Units sold before the adjustment.
        sold: u32,
        /// Rejected delta.
        delta: i64,
    },

    /// Ticket type with sales cannot be deleted.
    #[error("Ticket type {ticket_type_id} has {sold} units sold and cannot be deleted")]
    TicketTypeHasSales {
        /// Ticket type.
        ticket_type_id: TicketTypeId,
        /// Units sold.
        sold: u32,
    },

    /// Only ticket-less pending orders can be deleted.
    #[error("Order {order_id} cannot be deleted: {reason}")]
    OrderNotDeletable {
        /// Order.
        order_id: OrderId,
        /// Why deletion was refused.
        reason: String,
    },

    /// Inventory row changed since it was read.
    #[error("Version conflict on {ticket_type_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Ticket type.
        ticket_type_id: TicketTypeId,
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        actual: u64,
    },

    /// Generated order number is already taken.
    #[error("Order number already exists: {0}")]
    DuplicateOrderNumber(String),

    /// Could not generate a unique order number.
    #[error("Could not generate a unique order number after {attempts} attempts")]
    OrderNumberExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// Order was already completed with a different payment reference.
    #[error("Order {order_id} already completed with payment {recorded}, received {received}")]
    PaymentReferenceConflict {
        /// Order.
        order_id: OrderId,
        /// Reference already recorded on the order.
        recorded: String,
        /// Reference of the rejected attempt.
        received: String,
    },

    /// Reservations do not line up with the request.
    #[error("Reservation mismatch: {0}")]
    ReservationMismatch(String),

    /// Lock timeout, lost connection, serialization failure.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Any other backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl InventoryError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InsufficientStock { .. } | Self::SaleNotStarted { .. } | Self::SaleEnded { .. } => {
                ErrorKind::Business
            }
            Self::TicketTypeNotFound(_)
            | Self::OrderNotFound(_)
            | Self::ReservationNotFound(_)
            | Self::TicketNotFound(_) => ErrorKind::NotFound,
            Self::InvalidStateTransition { .. }
            | Self::InvalidTicketState { .. }
            | Self::QuantityBelowSold { .. }
            | Self::InventoryUnderflow { .. }
            | Self::TicketTypeHasSales { .. }
            | Self::OrderNotDeletable { .. }
            | Self::DuplicateOrderNumber(_)
            | Self::OrderNumberExhausted { .. }
            | Self::PaymentReferenceConflict { .. }
            | Self::ReservationMismatch(_) => ErrorKind::Conflict,
            Self::VersionConflict { .. } | Self::Transient(_) => ErrorKind::Transient,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the entire operation can be safely retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Whether this is a sale window rejection.
    #[must_use]
    pub const fn is_sale_window_closed(&self) -> bool {
        matches!(self, Self::SaleNotStarted { .. } | Self::SaleEnded { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::SaleNotStarted { .. } => "sale_not_started",
            Self::SaleEnded { .. } => "sale_ended",
            Self::VersionConflict { .. } | Self::Transient(_) => "transient",
            Self::Storage(_) => "storage",
            _ => match self.kind() {
                ErrorKind::NotFound => "not_found",
                _ => "conflict",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(InventoryError::Transient("lock timeout".into()).is_retryable());
        assert!(
            InventoryError::VersionConflict {
                ticket_type_id: TicketTypeId::new(),
                expected: 3,
                actual: 4,
            }
            .is_retryable()
        );
    }

    #[test]
    fn business_outcomes_are_not_retryable() {
        let error = InventoryError::InsufficientStock {
            ticket_type_id: TicketTypeId::new(),
            requested: 61,
            available: 40,
        };
        assert_eq!(error.kind(), ErrorKind::Business);
        assert!(!error.is_retryable());
        assert_eq!(error.label(), "insufficient_stock");
    }

    #[test]
    fn invalid_transition_display_names_both_states() {
        let error = InventoryError::InvalidStateTransition {
            order_id: OrderId::new(),
            from: OrderStatus::Cancelled,
            to: OrderStatus::Completed,
        };
        let display = error.to_string();
        assert!(display.contains("cancelled -> completed"));
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn sale_window_errors_are_grouped() {
        let error = InventoryError::SaleEnded { ended_at: Utc::now() };
        assert!(error.is_sale_window_closed());
        assert!(!InventoryError::Storage("disk".into()).is_sale_window_closed());
    }
}
