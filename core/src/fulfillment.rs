//! Fulfillment Transaction.
//!
//! Turns a paid order into tickets. The store performs the conditional
//! `pending → completed` update and the ticket inserts in one transaction;
//! this module builds the tickets, supplies the rules the store applies under
//! its locks, and handles the duplicate-confirmation cases.

use crate::environment::Clock;
use crate::error::{InventoryError, Result};
use crate::store::{FulfillmentOutcome, FulfillmentRequest, InventoryStore};
use crate::types::{
    Order, OrderId, OrderStatus, QrCode, Reservation, ReservationStatus, Ticket, TicketId,
    TicketSpec, TicketStatus, TicketTypeId,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::BTreeMap;
use std::sync::Arc;

const QR_CODE_PREFIX: &str = "TKT-";
const QR_CODE_RANDOM_LEN: usize = 32;

/// Mint a fresh, unpredictable redemption key.
#[must_use]
pub fn generate_qr_code() -> QrCode {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(QR_CODE_RANDOM_LEN)
        .map(char::from)
        .collect();
    QrCode::from_string(format!("{QR_CODE_PREFIX}{random}"))
}

/// Build one active ticket per spec.
#[must_use]
pub fn mint_tickets(order_id: OrderId, specs: &[TicketSpec], now: DateTime<Utc>) -> Vec<Ticket> {
    specs
        .iter()
        .map(|spec| Ticket {
            id: TicketId::new(),
            order_id,
            ticket_type_id: spec.ticket_type_id,
            qr_code: generate_qr_code(),
            status: TicketStatus::Active,
            created_at: now,
        })
        .collect()
}

/// Checks that the specs account for exactly the units held by the order.
///
/// # Errors
///
/// [`InventoryError::ReservationMismatch`] when a reservation is not held or
/// the per-ticket-type counts differ.
pub fn reconcile_specs(specs: &[TicketSpec], reservations: &[Reservation]) -> Result<()> {
    let mut held: BTreeMap<TicketTypeId, u64> = BTreeMap::new();
    for reservation in reservations {
        if reservation.status != ReservationStatus::Held {
            return Err(InventoryError::ReservationMismatch(format!(
                "reservation {} is {}",
                reservation.id, reservation.status
            )));
        }
        *held.entry(reservation.ticket_type_id).or_default() += u64::from(reservation.quantity);
    }

    let mut requested: BTreeMap<TicketTypeId, u64> = BTreeMap::new();
    for spec in specs {
        *requested.entry(spec.ticket_type_id).or_default() += 1;
    }

    if held != requested {
        return Err(InventoryError::ReservationMismatch(format!(
            "ticket specs {requested:?} do not match reserved units {held:?}"
        )));
    }
    Ok(())
}

/// Decides what a completion attempt on a non-pending order means.
///
/// Returns `Ok(())` when the order was already completed with the same
/// payment reference (a duplicate confirmation).
///
/// # Errors
///
/// [`InventoryError::PaymentReferenceConflict`] for a completed order with a
/// different reference, [`InventoryError::InvalidStateTransition`] for a
/// cancelled or refunded order.
pub fn check_repeat_completion(order: &Order, payment_reference: &str) -> Result<()> {
    match order.status {
        OrderStatus::Completed => match order.payment_id.as_deref() {
            Some(recorded) if recorded == payment_reference => Ok(()),
            recorded => Err(InventoryError::PaymentReferenceConflict {
                order_id: order.id,
                recorded: recorded.unwrap_or_default().to_string(),
                received: payment_reference.to_string(),
            }),
        },
        status => Err(InventoryError::InvalidStateTransition {
            order_id: order.id,
            from: status,
            to: OrderStatus::Completed,
        }),
    }
}

/// Service that completes paid orders and redeems tickets.
#[derive(Clone)]
pub struct Fulfillment {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
}

impl Fulfillment {
    /// Creates a new `Fulfillment`
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Complete a pending order and mint one ticket per spec.
    ///
    /// Calling this again with the same payment reference returns
    /// [`FulfillmentOutcome::AlreadyCompleted`] with the original tickets.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`]: empty reference or no specs
    /// - [`InventoryError::ReservationMismatch`]: specs differ from reserved units
    /// - [`InventoryError::PaymentReferenceConflict`]: completed with another reference
    /// - [`InventoryError::InvalidStateTransition`]: order cancelled or refunded
    #[tracing::instrument(skip(self, specs), fields(units = specs.len()))]
    pub async fn complete_order(
        &self,
        order_id: OrderId,
        payment_reference: &str,
        specs: Vec<TicketSpec>,
    ) -> Result<FulfillmentOutcome> {
        if payment_reference.trim().is_empty() {
            return Err(InventoryError::Validation("payment reference is required".to_string()));
        }
        if specs.is_empty() {
            return Err(InventoryError::Validation("at least one ticket spec is required".to_string()));
        }

        let now = self.clock.now();
        let request = FulfillmentRequest {
            order_id,
            payment_reference: payment_reference.to_string(),
            tickets: mint_tickets(order_id, &specs, now),
            specs,
            now,
        };

        let result = self.store.complete_order(request).await;
        match &result {
            Ok(FulfillmentOutcome::Completed { tickets, .. }) => {
                metrics::counter!("orders_completed_total").increment(1);
                metrics::counter!("tickets_issued_total").increment(tickets.len() as u64);
                tracing::info!(order_id = %order_id, tickets = tickets.len(), "Order fulfilled");
            }
            Ok(FulfillmentOutcome::AlreadyCompleted { .. }) => {
                metrics::counter!("fulfillment_duplicates_total").increment(1);
                tracing::info!(order_id = %order_id, "Duplicate payment confirmation ignored");
            }
            Err(error @ InventoryError::PaymentReferenceConflict { .. }) => {
                metrics::counter!("fulfillment_conflicts_total").increment(1);
                tracing::error!(order_id = %order_id, %error, "Order completed twice with different payments, needs reconciliation");
            }
            Err(error) => {
                tracing::warn!(order_id = %order_id, %error, "Fulfillment failed");
            }
        }
        result
    }

    /// Mark a ticket used at the door.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketNotFound`], [`InventoryError::InvalidTicketState`]
    /// when the ticket is not active, or store errors.
    pub async fn redeem(&self, qr_code: &str) -> Result<Ticket> {
        if qr_code.trim().is_empty() {
            return Err(InventoryError::Validation("qr code is required".to_string()));
        }
        let ticket = self.store.redeem_ticket(qr_code.to_string()).await?;
        tracing::info!(ticket_id = %ticket.id, order_id = %ticket.order_id, at = %self.clock.now(), "Ticket redeemed");
        Ok(ticket)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BillingDetails, EventId, Money, NewReservation, OrderNumber, ReservationId, UserId};
    use std::collections::HashSet;

    fn held(ticket_type_id: TicketTypeId, quantity: u32) -> Reservation {
        Reservation::held(
            NewReservation {
                id: ReservationId::new(),
                ticket_type_id,
                owner_id: UserId::new(),
                quantity,
                expires_at: Utc::now(),
            },
            Utc::now(),
        )
    }

    fn completed_order(payment_id: &str) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            user_id: UserId::new(),
            event_id: EventId::new(),
            order_number: OrderNumber::new(now, 1),
            total_amount: Money::from_minor(7500),
            status: OrderStatus::Completed,
            payment_id: Some(payment_id.to_string()),
            billing: BillingDetails {
                email: "grace@example.com".to_string(),
                name: "Grace".to_string(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn qr_codes_are_unique_and_opaque() {
        let codes: HashSet<_> = (0..1000).map(|_| generate_qr_code()).collect();
        assert_eq!(codes.len(), 1000);
        for code in &codes {
            assert!(code.as_str().starts_with("TKT-"));
            assert_eq!(code.as_str().len(), 4 + 32);
        }
    }

    #[test]
    fn specs_must_match_reserved_units() {
        let vip = TicketTypeId::new();
        let floor = TicketTypeId::new();
        let reservations = vec![held(vip, 2), held(floor, 1)];

        let exact = vec![
            TicketSpec { ticket_type_id: vip },
            TicketSpec { ticket_type_id: floor },
            TicketSpec { ticket_type_id: vip },
        ];
        assert!(reconcile_specs(&exact, &reservations).is_ok());

        let short = vec![TicketSpec { ticket_type_id: vip }, TicketSpec { ticket_type_id: floor }];
        assert!(reconcile_specs(&short, &reservations).is_err());

        let wrong_type = vec![
            TicketSpec { ticket_type_id: vip },
            TicketSpec { ticket_type_id: vip },
            TicketSpec { ticket_type_id: vip },
        ];
        assert!(reconcile_specs(&wrong_type, &reservations).is_err());
    }

    #[test]
    fn released_reservations_cannot_be_fulfilled() {
        let vip = TicketTypeId::new();
        let mut reservation = held(vip, 1);
        reservation.status = ReservationStatus::Released;
        assert!(matches!(
            reconcile_specs(&[TicketSpec { ticket_type_id: vip }], &[reservation]),
            Err(InventoryError::ReservationMismatch(_))
        ));
    }

    #[test]
    fn repeat_completion_with_same_reference_is_idempotent() {
        let order = completed_order("pay_123");
        assert!(check_repeat_completion(&order, "pay_123").is_ok());
        assert!(matches!(
            check_repeat_completion(&order, "pay_999"),
            Err(InventoryError::PaymentReferenceConflict { .. })
        ));
    }

    #[test]
    fn completion_of_cancelled_order_is_a_transition_error() {
        let mut order = completed_order("pay_123");
        order.status = OrderStatus::Cancelled;
        assert!(matches!(
            check_repeat_completion(&order, "pay_123"),
            Err(InventoryError::InvalidStateTransition {
                from: OrderStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn minted_tickets_are_active_and_owned() {
        let order_id = OrderId::new();
        let vip = TicketTypeId::new();
        let tickets = mint_tickets(
            order_id,
            &[TicketSpec { ticket_type_id: vip }, TicketSpec { ticket_type_id: vip }],
            Utc::now(),
        );
        assert_eq!(tickets.len(), 2);
        assert!(tickets.iter().all(|t| t.order_id == order_id && t.status == TicketStatus::Active));
        assert_ne!(tickets[0].qr_code, tickets[1].qr_code);
    }
}
