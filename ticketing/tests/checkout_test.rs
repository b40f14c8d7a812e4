//! Checkout and fulfillment flow tests.
//!
//! Drives [`CheckoutService`] against the in-memory store and mock payment
//! gateway: happy path, duplicate confirmations, payment failures and the
//! compensation of every failed step.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use boxoffice_core::environment::Clock;
use boxoffice_core::error::InventoryError;
use boxoffice_core::payment::{PaymentConfirmation, PaymentGatewayError};
use boxoffice_core::ReservationManager;
use boxoffice_core::store::InventoryStore;
use boxoffice_core::types::{
    EventId, Money, OrderStatus, ReservationStatus, TicketStatus, TicketType, UserId,
};
use boxoffice_testing::fixtures::{billing, ticket_type_on_sale};
use boxoffice_testing::{InMemoryInventoryStore, ManualClock, MockPaymentGateway, StoreOp, test_epoch};
use std::sync::Arc;
use ticketing::{
    CheckoutError, CheckoutLine, CheckoutRequest, CheckoutService, ConfirmationOutcome,
};

struct Fixture {
    store: InMemoryInventoryStore,
    gateway: MockPaymentGateway,
    clock: ManualClock,
    checkout: CheckoutService,
}

fn fixture() -> Fixture {
    let store = InMemoryInventoryStore::new();
    let gateway = MockPaymentGateway::new();
    let clock = ManualClock::new(test_epoch());
    let checkout = CheckoutService::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Arc::new(gateway.clone()),
    );
    Fixture {
        store,
        gateway,
        clock,
        checkout,
    }
}

impl Fixture {
    async fn ticket_type(&self, event_id: EventId, quantity: u32) -> TicketType {
        self.store
            .insert_ticket_type(ticket_type_on_sale(event_id, quantity, self.clock.now()))
            .await
            .unwrap()
    }

    async fn sold(&self, ticket_type: &TicketType) -> u32 {
        self.store.ticket_type(ticket_type.id).await.unwrap().unwrap().sold
    }
}

fn request(event_id: EventId, lines: Vec<CheckoutLine>) -> CheckoutRequest {
    CheckoutRequest {
        user_id: UserId::new(),
        event_id,
        lines,
        billing: billing(),
    }
}

fn line(ticket_type: &TicketType, quantity: u32) -> CheckoutLine {
    CheckoutLine {
        ticket_type_id: ticket_type.id,
        quantity,
    }
}

#[tokio::test]
async fn test_checkout_then_payment_issues_tickets() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;

    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 2)]))
        .await
        .unwrap();

    assert_eq!(session.order.status, OrderStatus::Pending);
    assert_eq!(session.order.total_amount, Money::from_minor(7500));
    assert_eq!(session.redirect_url, MockPaymentGateway::redirect_url(session.order.id));
    assert_eq!(f.gateway.sessions(), vec![(session.order.id, Money::from_minor(7500))]);
    assert_eq!(f.sold(&general).await, 2);

    let outcome = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_abc"))
        .await
        .unwrap();

    let ConfirmationOutcome::Fulfilled(fulfilled) = outcome else {
        panic!("expected fulfillment, got {outcome:?}");
    };
    assert!(fulfilled.is_first_completion());
    assert_eq!(fulfilled.order().status, OrderStatus::Completed);
    assert_eq!(fulfilled.order().payment_id.as_deref(), Some("pay_abc"));
    assert_eq!(fulfilled.tickets().len(), 2);
    assert!(fulfilled.tickets().iter().all(|t| t.status == TicketStatus::Active));

    let reservation = f
        .store
        .reservation(session.reservations[0].reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Consumed);
    assert_eq!(f.sold(&general).await, 2, "issued tickets keep their units");
}

#[tokio::test]
async fn test_duplicate_confirmation_mints_once() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 3)]))
        .await
        .unwrap();

    let confirmation = PaymentConfirmation::succeeded(session.order.id, "pay_dup");
    let first = f
        .checkout
        .handle_payment_confirmation(confirmation.clone())
        .await
        .unwrap();
    let second = f
        .checkout
        .handle_payment_confirmation(confirmation)
        .await
        .unwrap();

    let (ConfirmationOutcome::Fulfilled(first), ConfirmationOutcome::Fulfilled(second)) = (first, second) else {
        panic!("both deliveries should report fulfillment");
    };
    assert!(first.is_first_completion());
    assert!(!second.is_first_completion());
    let mut first_ids: Vec<_> = first.tickets().iter().map(|t| t.id).collect();
    let mut second_ids: Vec<_> = second.tickets().iter().map(|t| t.id).collect();
    first_ids.sort();
    second_ids.sort();
    assert_eq!(first_ids, second_ids);
    assert_eq!(f.store.ticket_count(), 3);

    let conflict = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_other"))
        .await;
    assert!(matches!(conflict, Err(InventoryError::PaymentReferenceConflict { .. })));
    assert_eq!(f.store.ticket_count(), 3);
}

#[tokio::test]
async fn test_failed_payment_cancels_and_restocks() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 4)]))
        .await
        .unwrap();
    assert_eq!(f.sold(&general).await, 4);

    let outcome = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::failed(session.order.id, "pay_x", "card declined"))
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Cancelled(ref o) if o.status == OrderStatus::Cancelled));
    assert_eq!(f.sold(&general).await, 0);

    let repeat = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::failed(session.order.id, "pay_x", "card declined"))
        .await
        .unwrap();
    assert!(matches!(repeat, ConfirmationOutcome::AlreadyFinal(_)));
    assert_eq!(f.sold(&general).await, 0);

    let late_success = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_x"))
        .await;
    assert!(matches!(late_success, Err(InventoryError::InvalidStateTransition { .. })));
    assert_eq!(f.store.ticket_count(), 0);
}

#[tokio::test]
async fn test_gateway_failure_cancels_the_order() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    f.gateway.fail_next(PaymentGatewayError::Timeout);

    let result = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 2)]))
        .await;

    assert!(matches!(result, Err(CheckoutError::Payment(PaymentGatewayError::Timeout))));
    assert_eq!(f.sold(&general).await, 0);
    assert_eq!(f.store.order_count(), 1);
    assert!(f.gateway.sessions().is_empty());
}

#[tokio::test]
async fn test_later_line_failure_releases_earlier_holds() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let vip = f.ticket_type(event_id, 1).await;

    let result = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 3), line(&vip, 2)]))
        .await;

    assert!(matches!(
        result,
        Err(CheckoutError::Inventory(InventoryError::InsufficientStock { .. }))
    ));
    assert_eq!(f.sold(&general).await, 0);
    assert_eq!(f.sold(&vip).await, 0);
    assert_eq!(f.store.order_count(), 0);
}

#[tokio::test]
async fn test_order_creation_failure_releases_holds() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    f.store.fail_next(
        StoreOp::InsertOrder,
        InventoryError::Storage("disk full".to_string()),
    );

    let result = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 5)]))
        .await;

    assert!(matches!(result, Err(CheckoutError::Inventory(InventoryError::Storage(_)))));
    assert_eq!(f.sold(&general).await, 0);
}

#[tokio::test]
async fn test_transient_hold_errors_are_retried() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    f.store.fail_next(
        StoreOp::HoldInventory,
        InventoryError::Transient("lock timeout".to_string()),
    );

    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 1)]))
        .await
        .expect("one transient failure is retried");
    assert_eq!(session.reservations.len(), 1);
    assert_eq!(f.sold(&general).await, 1);
}

#[tokio::test]
async fn test_ticket_types_of_other_events_are_refused() {
    let f = fixture();
    let other_event = f.ticket_type(EventId::new(), 10).await;

    let result = f
        .checkout
        .checkout(request(EventId::new(), vec![line(&other_event, 1)]))
        .await;
    assert!(matches!(result, Err(CheckoutError::Inventory(InventoryError::Validation(_)))));
    assert_eq!(f.sold(&other_event).await, 0);

    let empty = f.checkout.checkout(request(EventId::new(), Vec::new())).await;
    assert!(matches!(empty, Err(CheckoutError::Inventory(InventoryError::Validation(_)))));
}

#[tokio::test]
async fn test_user_cancellation_is_final() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 2)]))
        .await
        .unwrap();

    let cancelled = f.checkout.cancel(session.order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(f.sold(&general).await, 0);

    assert!(matches!(
        f.checkout.cancel(session.order.id).await,
        Err(InventoryError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_refund_keeps_units_sold_and_voids_tickets() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 2)]))
        .await
        .unwrap();
    f.checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_r"))
        .await
        .unwrap();

    let refunded = f
        .checkout
        .orders()
        .update_status(session.order.id, OrderStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);

    let tickets = f.checkout.orders().tickets(session.order.id).await.unwrap();
    assert!(tickets.iter().all(|t| t.status == TicketStatus::Refunded));
    assert_eq!(f.sold(&general).await, 2);

    assert!(matches!(
        f.checkout
            .orders()
            .update_status(session.order.id, OrderStatus::Completed)
            .await,
        Err(InventoryError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_tickets_redeem_once() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 1)]))
        .await
        .unwrap();
    let ConfirmationOutcome::Fulfilled(outcome) = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_door"))
        .await
        .unwrap()
    else {
        panic!("payment should fulfill the order");
    };

    let qr_code = outcome.tickets()[0].qr_code.to_string();
    let used = f.checkout.fulfillment().redeem(&qr_code).await.unwrap();
    assert_eq!(used.status, TicketStatus::Used);
    assert!(matches!(
        f.checkout.fulfillment().redeem(&qr_code).await,
        Err(InventoryError::InvalidTicketState { .. })
    ));
    assert!(matches!(
        f.checkout.fulfillment().redeem("TKT-unknown").await,
        Err(InventoryError::TicketNotFound(_))
    ));
}

#[tokio::test]
async fn test_holds_backing_an_order_cannot_be_released_alone() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    let session = f
        .checkout
        .checkout(request(event_id, vec![line(&general, 2)]))
        .await
        .unwrap();
    let manager = ReservationManager::new(Arc::new(f.store.clone()), Arc::new(f.clock.clone()));

    assert!(matches!(
        manager.release(&session.reservations[0]).await,
        Err(InventoryError::ReservationMismatch(_))
    ));
    assert_eq!(f.sold(&general).await, 2);
    assert_eq!(
        manager.get(session.reservations[0].reservation_id).await.unwrap().status,
        ReservationStatus::Held
    );

    // The order is still fully backed and can be paid for.
    let outcome = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_1"))
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Fulfilled(_)));
    assert_eq!(f.store.ticket_count(), 2);
    assert_eq!(f.sold(&general).await, 2);
}
