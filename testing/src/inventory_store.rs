//! In-memory inventory store
//!
//! A single mutex guards every table, so each [`InventoryStore`] call is one
//! atomic step, the same guarantee the `PostgreSQL` backend gets from its
//! transactions and row locks. All business rules come from
//! `boxoffice-core`; this module only does the bookkeeping.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use boxoffice_core::error::{InventoryError, Result};
use boxoffice_core::fulfillment::{check_repeat_completion, reconcile_specs};
use boxoffice_core::order::check_attachable;
use boxoffice_core::store::{
    CancelOutcome, FulfillmentOutcome, FulfillmentRequest, InventoryStore, OrderInsert,
    ReleaseOutcome, StoreFuture,
};
use boxoffice_core::types::{
    EventId, NewReservation, Order, OrderId, OrderNumber, OrderStatus, Reservation, ReservationId,
    ReservationStatus, Ticket, TicketId, TicketStatus, TicketType, TicketTypeId, TicketTypeUpdate,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`InventoryStore::hold_inventory`]
    HoldInventory,
    /// [`InventoryStore::release_reservation`]
    ReleaseReservation,
    /// [`InventoryStore::insert_order`]
    InsertOrder,
    /// [`InventoryStore::cancel_order`]
    CancelOrder,
    /// [`InventoryStore::complete_order`]
    CompleteOrder,
    /// [`InventoryStore::adjust_inventory`]
    AdjustInventory,
    /// [`InventoryStore::stale_pending_orders`]
    StalePendingOrders,
}

#[derive(Debug, Default)]
struct Tables {
    ticket_types: HashMap<TicketTypeId, TicketType>,
    reservations: HashMap<ReservationId, Reservation>,
    orders: HashMap<OrderId, Order>,
    tickets: HashMap<TicketId, Ticket>,
    failures: HashMap<StoreOp, VecDeque<InventoryError>>,
}

impl Tables {
    fn take_failure(&mut self, op: StoreOp) -> Option<InventoryError> {
        self.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn ticket_type_mut(&mut self, id: TicketTypeId) -> Result<&mut TicketType> {
        self.ticket_types
            .get_mut(&id)
            .ok_or(InventoryError::TicketTypeNotFound(id))
    }

    fn order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(&id)
            .cloned()
            .ok_or(InventoryError::OrderNotFound(id))
    }

    /// Apply `delta` to a ticket type, leaving it untouched on error.
    fn adjust(
        &mut self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> Result<TicketType> {
        let slot = self.ticket_type_mut(id)?;
        let mut updated = slot.clone();
        updated.apply_delta(delta, expected_version)?;
        *slot = updated.clone();
        Ok(updated)
    }

    fn release(&mut self, reservation_id: ReservationId) -> Result<ReleaseOutcome> {
        let reservation = self
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(InventoryError::ReservationNotFound(reservation_id))?;
        if !reservation.ensure_releasable()? {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        self.free_hold(&reservation).map(ReleaseOutcome::Released)
    }

    /// Give a held reservation's units back, attached or not.
    fn free_hold(&mut self, reservation: &Reservation) -> Result<TicketType> {
        let ticket_type = self.adjust(
            reservation.ticket_type_id,
            -i64::from(reservation.quantity),
            None,
        )?;
        if let Some(stored) = self.reservations.get_mut(&reservation.id) {
            stored.status = ReservationStatus::Released;
        }
        Ok(ticket_type)
    }

    fn reservations_for_order(&self, order_id: OrderId) -> Vec<Reservation> {
        let mut reservations: Vec<_> = self
            .reservations
            .values()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        reservations
    }

    /// Release every held reservation of an order, returning the units freed.
    fn release_order_holds(&mut self, order_id: OrderId) -> Result<u32> {
        let held: Vec<_> = self
            .reservations_for_order(order_id)
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Held)
            .collect();

        // Validate every adjustment before applying any of them.
        for reservation in &held {
            let mut trial = self
                .ticket_types
                .get(&reservation.ticket_type_id)
                .cloned()
                .ok_or(InventoryError::TicketTypeNotFound(reservation.ticket_type_id))?;
            trial.apply_delta(-i64::from(reservation.quantity), None)?;
        }

        let mut released = 0;
        for reservation in held {
            self.free_hold(&reservation)?;
            released += reservation.quantity;
        }
        Ok(released)
    }

    fn tickets_for_order(&self, order_id: OrderId) -> Vec<Ticket> {
        let mut tickets: Vec<_> = self
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.created_at, t.id));
        tickets
    }
}

/// In-memory [`InventoryStore`] for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use boxoffice_testing::InMemoryInventoryStore;
/// use boxoffice_core::store::InventoryStore;
/// use boxoffice_core::types::EventId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// assert!(store.ticket_types_for_event(EventId::new()).await?.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryInventoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `error`.
    ///
    /// Several failures can be queued; they are returned in order.
    pub fn fail_next(&self, op: StoreOp, error: InventoryError) {
        self.tables
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Number of stored reservations in any status
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.tables.lock().unwrap().reservations.len()
    }

    /// Number of stored orders
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.tables.lock().unwrap().orders.len()
    }

    /// Number of stored tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.tables.lock().unwrap().tickets.len()
    }

    /// Run `f` against the tables as one atomic step.
    fn atomically<T, F>(&self, op: Option<StoreOp>, f: F) -> StoreFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let result = {
            let mut tables = self.tables.lock().unwrap();
            match op.and_then(|op| tables.take_failure(op)) {
                Some(error) => Err(error),
                None => f(&mut tables),
            }
        };
        Box::pin(std::future::ready(result))
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, TicketType> {
        self.atomically(None, move |tables| {
            if tables.ticket_types.contains_key(&ticket_type.id) {
                return Err(InventoryError::Storage(format!(
                    "ticket type {} already exists",
                    ticket_type.id
                )));
            }
            tables.ticket_types.insert(ticket_type.id, ticket_type.clone());
            Ok(ticket_type)
        })
    }

    fn ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        self.atomically(None, move |tables| Ok(tables.ticket_types.get(&id).cloned()))
    }

    fn ticket_types_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<TicketType>> {
        self.atomically(None, move |tables| {
            let mut ticket_types: Vec<_> = tables
                .ticket_types
                .values()
                .filter(|t| t.event_id == event_id)
                .cloned()
                .collect();
            ticket_types.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
            Ok(ticket_types)
        })
    }

    fn update_ticket_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> StoreFuture<'_, TicketType> {
        self.atomically(None, move |tables| {
            let slot = tables.ticket_type_mut(id)?;
            let mut updated = slot.clone();
            updated.apply_update(&update)?;
            *slot = updated.clone();
            Ok(updated)
        })
    }

    fn delete_ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, ()> {
        self.atomically(None, move |tables| {
            tables.ticket_type_mut(id)?.ensure_deletable()?;
            tables.ticket_types.remove(&id);
            tables.reservations.retain(|_, r| r.ticket_type_id != id);
            Ok(())
        })
    }

    fn adjust_inventory(
        &self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> StoreFuture<'_, TicketType> {
        self.atomically(Some(StoreOp::AdjustInventory), move |tables| {
            tables.adjust(id, delta, expected_version)
        })
    }

    fn held_quantity(&self, id: TicketTypeId) -> StoreFuture<'_, u32> {
        self.atomically(None, move |tables| {
            Ok(tables
                .reservations
                .values()
                .filter(|r| r.ticket_type_id == id && r.status == ReservationStatus::Held)
                .map(|r| r.quantity)
                .sum())
        })
    }

    fn hold_inventory(
        &self,
        reservation: NewReservation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Reservation> {
        self.atomically(Some(StoreOp::HoldInventory), move |tables| {
            let slot = tables.ticket_type_mut(reservation.ticket_type_id)?;
            slot.check_reservable(reservation.quantity, now)?;
            let mut updated = slot.clone();
            updated.apply_delta(i64::from(reservation.quantity), None)?;
            *slot = updated;

            let held = Reservation::held(reservation, now);
            tables.reservations.insert(held.id, held.clone());
            Ok(held)
        })
    }

    fn release_reservation(&self, id: ReservationId) -> StoreFuture<'_, ReleaseOutcome> {
        self.atomically(Some(StoreOp::ReleaseReservation), move |tables| {
            tables.release(id)
        })
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        self.atomically(None, move |tables| Ok(tables.reservations.get(&id).cloned()))
    }

    fn reservations_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Reservation>> {
        self.atomically(None, move |tables| Ok(tables.reservations_for_order(order_id)))
    }

    fn expired_orphan_reservations(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        self.atomically(None, move |tables| {
            let mut expired: Vec<_> = tables
                .reservations
                .values()
                .filter(|r| {
                    r.status == ReservationStatus::Held && r.order_id.is_none() && r.is_expired(now)
                })
                .map(|r| (r.expires_at, r.id))
                .collect();
            expired.sort();
            Ok(expired
                .into_iter()
                .take(limit as usize)
                .map(|(_, id)| id)
                .collect())
        })
    }

    fn insert_order(&self, insert: OrderInsert) -> StoreFuture<'_, Order> {
        self.atomically(Some(StoreOp::InsertOrder), move |tables| {
            let OrderInsert {
                order,
                reservation_ids,
            } = insert;

            if tables
                .orders
                .values()
                .any(|o| o.order_number == order.order_number)
            {
                return Err(InventoryError::DuplicateOrderNumber(
                    order.order_number.to_string(),
                ));
            }

            let mut seen = HashSet::new();
            for reservation_id in &reservation_ids {
                if !seen.insert(*reservation_id) {
                    return Err(InventoryError::ReservationMismatch(format!(
                        "reservation {reservation_id} listed twice"
                    )));
                }
                let reservation = tables
                    .reservations
                    .get(reservation_id)
                    .ok_or(InventoryError::ReservationNotFound(*reservation_id))?;
                let event_id = tables
                    .ticket_types
                    .get(&reservation.ticket_type_id)
                    .map(|t| t.event_id)
                    .ok_or(InventoryError::TicketTypeNotFound(reservation.ticket_type_id))?;
                check_attachable(&order, reservation, event_id)?;
            }

            for reservation_id in &reservation_ids {
                if let Some(reservation) = tables.reservations.get_mut(reservation_id) {
                    reservation.order_id = Some(order.id);
                }
            }
            tables.orders.insert(order.id, order.clone());
            Ok(order)
        })
    }

    fn order(&self, id: OrderId) -> StoreFuture<'_, Option<Order>> {
        self.atomically(None, move |tables| Ok(tables.orders.get(&id).cloned()))
    }

    fn order_by_number(&self, number: OrderNumber) -> StoreFuture<'_, Option<Order>> {
        self.atomically(None, move |tables| {
            Ok(tables
                .orders
                .values()
                .find(|o| o.order_number == number)
                .cloned())
        })
    }

    fn cancel_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, CancelOutcome> {
        self.atomically(Some(StoreOp::CancelOrder), move |tables| {
            let order = tables.order(id)?;
            if order.status != OrderStatus::Pending {
                return Ok(CancelOutcome::NotPending(order));
            }

            let released_units = tables.release_order_holds(id)?;
            let order = tables
                .orders
                .get_mut(&id)
                .ok_or(InventoryError::OrderNotFound(id))?;
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            Ok(CancelOutcome::Cancelled {
                order: order.clone(),
                released_units,
            })
        })
    }

    fn complete_order(&self, request: FulfillmentRequest) -> StoreFuture<'_, FulfillmentOutcome> {
        self.atomically(Some(StoreOp::CompleteOrder), move |tables| {
            let order = tables.order(request.order_id)?;
            if order.status != OrderStatus::Pending {
                check_repeat_completion(&order, &request.payment_reference)?;
                let tickets = tables.tickets_for_order(order.id);
                return Ok(FulfillmentOutcome::AlreadyCompleted { order, tickets });
            }

            let reservations = tables.reservations_for_order(order.id);
            reconcile_specs(&request.specs, &reservations)?;
            if request
                .tickets
                .iter()
                .any(|t| tables.tickets.values().any(|e| e.qr_code == t.qr_code))
            {
                return Err(InventoryError::Storage("duplicate qr code".to_string()));
            }

            for reservation in &reservations {
                if let Some(stored) = tables.reservations.get_mut(&reservation.id) {
                    stored.status = ReservationStatus::Consumed;
                }
            }
            for ticket in &request.tickets {
                tables.tickets.insert(ticket.id, ticket.clone());
            }
            let stored = tables
                .orders
                .get_mut(&order.id)
                .ok_or(InventoryError::OrderNotFound(order.id))?;
            stored.status = OrderStatus::Completed;
            stored.payment_id = Some(request.payment_reference);
            stored.updated_at = request.now;

            Ok(FulfillmentOutcome::Completed {
                order: stored.clone(),
                tickets: request.tickets,
            })
        })
    }

    fn refund_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, Order> {
        self.atomically(None, move |tables| {
            tables.order(id)?.ensure_transition(OrderStatus::Refunded)?;
            for ticket in tables.tickets.values_mut().filter(|t| t.order_id == id) {
                ticket.status = TicketStatus::Refunded;
            }
            let order = tables
                .orders
                .get_mut(&id)
                .ok_or(InventoryError::OrderNotFound(id))?;
            order.status = OrderStatus::Refunded;
            order.updated_at = now;
            Ok(order.clone())
        })
    }

    fn delete_order(&self, id: OrderId) -> StoreFuture<'_, ()> {
        self.atomically(None, move |tables| {
            let order = tables.order(id)?;
            order.ensure_deletable(tables.tickets_for_order(id).len())?;
            tables.release_order_holds(id)?;
            for reservation in tables.reservations.values_mut() {
                if reservation.order_id == Some(id) {
                    reservation.order_id = None;
                }
            }
            tables.orders.remove(&id);
            Ok(())
        })
    }

    fn stale_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<OrderId>> {
        self.atomically(Some(StoreOp::StalePendingOrders), move |tables| {
            let mut stale: Vec<_> = tables
                .orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
                .map(|o| (o.created_at, o.id))
                .collect();
            stale.sort();
            Ok(stale
                .into_iter()
                .take(limit as usize)
                .map(|(_, id)| id)
                .collect())
        })
    }

    fn tickets_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        self.atomically(None, move |tables| Ok(tables.tickets_for_order(order_id)))
    }

    fn redeem_ticket(&self, qr_code: String) -> StoreFuture<'_, Ticket> {
        self.atomically(None, move |tables| {
            let ticket = tables
                .tickets
                .values_mut()
                .find(|t| t.qr_code.as_str() == qr_code)
                .ok_or_else(|| InventoryError::TicketNotFound(qr_code.clone()))?;
            ticket.redeem()?;
            Ok(ticket.clone())
        })
    }
}
