//! Order State Machine.
//!
//! Orders start `pending`, and move along exactly three edges:
//! `pending → completed` (through [`crate::Fulfillment`]),
//! `pending → cancelled` and `completed → refunded`. Every store update is
//! conditional on the status it expects, so a user cancel, a sweeper expiry
//! and a late payment confirmation can race and exactly one wins.

use crate::environment::Clock;
use crate::error::{InventoryError, Result};
use crate::store::{CancelOutcome, InventoryStore, OrderInsert};
use crate::types::{
    EventId, NewOrder, Order, OrderId, OrderNumber, OrderStatus, Reservation, ReservationStatus,
    Ticket,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;

/// Default bound on order number regeneration.
pub const DEFAULT_ORDER_NUMBER_ATTEMPTS: u32 = 5;

/// Generate a fresh `ORD-YYYYMMDD-NNNNNN` number for `date`.
#[must_use]
pub fn generate_order_number(date: DateTime<Utc>) -> OrderNumber {
    let suffix = rand::thread_rng().gen_range(0..1_000_000);
    OrderNumber::new(date, suffix)
}

/// Checks that a reservation can be attached to a new order.
///
/// Store backends call this for every reservation while holding their locks.
///
/// # Errors
///
/// [`InventoryError::ReservationMismatch`] when the reservation is not held,
/// has expired, is already attached, belongs to another user, or is for
/// another event.
pub fn check_attachable(
    order: &Order,
    reservation: &Reservation,
    ticket_type_event: EventId,
) -> Result<()> {
    let mismatch = |reason: &str| {
        Err(InventoryError::ReservationMismatch(format!(
            "reservation {} {reason}",
            reservation.id
        )))
    };

    if reservation.status != ReservationStatus::Held {
        return mismatch(&format!("is {}", reservation.status));
    }
    if reservation.is_expired(order.created_at) {
        return mismatch("has expired");
    }
    if let Some(existing) = reservation.order_id {
        return mismatch(&format!("is already attached to order {existing}"));
    }
    if reservation.owner_id != order.user_id {
        return mismatch("belongs to another user");
    }
    if ticket_type_event != order.event_id {
        return mismatch("is for a different event");
    }
    Ok(())
}

/// Service enforcing the order lifecycle.
#[derive(Clone)]
pub struct OrderStateMachine {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    max_number_attempts: u32,
}

impl OrderStateMachine {
    /// Creates a new `OrderStateMachine`
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            max_number_attempts: DEFAULT_ORDER_NUMBER_ATTEMPTS,
        }
    }

    /// Override how many order numbers are tried before giving up.
    #[must_use]
    pub const fn with_max_number_attempts(mut self, attempts: u32) -> Self {
        self.max_number_attempts = attempts;
        self
    }

    /// Insert a pending order with a fresh order number and attach its
    /// reservations.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`]: no reservations, empty billing fields
    /// - [`InventoryError::ReservationMismatch`]: a reservation is not attachable
    /// - [`InventoryError::OrderNumberExhausted`]: every generated number collided
    #[tracing::instrument(skip(self, input), fields(user_id = %input.user_id, event_id = %input.event_id))]
    pub async fn create(&self, input: NewOrder) -> Result<Order> {
        if input.reservation_ids.is_empty() {
            return Err(InventoryError::Validation(
                "an order needs at least one reservation".to_string(),
            ));
        }
        if input.billing.email.trim().is_empty() || input.billing.name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "billing email and name are required".to_string(),
            ));
        }

        let now = self.clock.now();
        for attempt in 1..=self.max_number_attempts {
            let order = Order {
                id: OrderId::new(),
                user_id: input.user_id,
                event_id: input.event_id,
                order_number: generate_order_number(now),
                total_amount: input.total_amount,
                status: OrderStatus::Pending,
                payment_id: None,
                billing: input.billing.clone(),
                created_at: now,
                updated_at: now,
            };
            let insert = OrderInsert {
                order,
                reservation_ids: input.reservation_ids.clone(),
            };

            match self.store.insert_order(insert).await {
                Ok(order) => {
                    metrics::counter!("orders_created_total").increment(1);
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        total_amount = order.total_amount.minor(),
                        "Order created"
                    );
                    return Ok(order);
                }
                Err(InventoryError::DuplicateOrderNumber(number)) => {
                    tracing::debug!(attempt, order_number = %number, "Order number collision, regenerating");
                }
                Err(error) => return Err(error),
            }
        }

        tracing::error!(
            attempts = self.max_number_attempts,
            "Could not generate a unique order number"
        );
        Err(InventoryError::OrderNumberExhausted {
            attempts: self.max_number_attempts,
        })
    }

    /// Move an order to `next` if the status graph allows it.
    ///
    /// Cancelling releases the order's held reservations in the same
    /// transaction. Refunding marks its tickets refunded. Completion needs a
    /// payment reference and ticket specs, so it only happens through
    /// [`crate::Fulfillment::complete_order`].
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`] for illegal transitions
    /// (including losing a race to another transition), not found or store errors.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, id: OrderId, next: OrderStatus) -> Result<Order> {
        let order = self.get(id).await?;
        order.ensure_transition(next)?;

        match next {
            OrderStatus::Cancelled => self.cancel(id).await,
            OrderStatus::Refunded => {
                let refunded = self.store.refund_order(id, self.clock.now()).await?;
                metrics::counter!("orders_refunded_total").increment(1);
                tracing::info!(order_id = %id, "Order refunded");
                Ok(refunded)
            }
            OrderStatus::Completed => Err(InventoryError::Validation(
                "orders are completed through fulfillment with a payment reference".to_string(),
            )),
            OrderStatus::Pending => Err(InventoryError::InvalidStateTransition {
                order_id: id,
                from: order.status,
                to: next,
            }),
        }
    }

    /// Cancel a pending order, releasing its holds.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`] when the order already left
    /// `pending`, not found or store errors.
    pub async fn cancel(&self, id: OrderId) -> Result<Order> {
        match self.store.cancel_order(id, self.clock.now()).await? {
            CancelOutcome::Cancelled {
                order,
                released_units,
            } => {
                metrics::counter!("orders_cancelled_total", "reason" => "requested").increment(1);
                tracing::info!(order_id = %id, released_units, "Order cancelled");
                Ok(order)
            }
            CancelOutcome::NotPending(order) => Err(InventoryError::InvalidStateTransition {
                order_id: id,
                from: order.status,
                to: OrderStatus::Cancelled,
            }),
        }
    }

    /// Delete a pending order that has no tickets.
    ///
    /// # Errors
    ///
    /// [`InventoryError::OrderNotDeletable`], not found or store errors.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: OrderId) -> Result<()> {
        self.store.delete_order(id).await?;
        tracing::info!(order_id = %id, "Order deleted");
        Ok(())
    }

    /// Load an order.
    ///
    /// # Errors
    ///
    /// [`InventoryError::OrderNotFound`] or store errors.
    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.store
            .order(id)
            .await?
            .ok_or(InventoryError::OrderNotFound(id))
    }

    /// Look an order up by its human-readable number.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for a malformed number, or store errors.
    pub async fn find_by_number(&self, number: &str) -> Result<Option<Order>> {
        let number = OrderNumber::parse(number)?;
        self.store.order_by_number(number).await
    }

    /// Tickets owned by an order.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn tickets(&self, id: OrderId) -> Result<Vec<Ticket>> {
        self.store.tickets_for_order(id).await
    }
}
