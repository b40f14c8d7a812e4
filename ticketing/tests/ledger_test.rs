//! Ticket type ledger tests: creation rules, edits guarded by `sold`,
//! manual adjustments and the availability report.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use boxoffice_core::environment::Clock;
use boxoffice_core::error::InventoryError;
use boxoffice_core::payment::PaymentConfirmation;
use boxoffice_core::types::{EventId, NewTicketType, TicketTypeId, TicketTypeUpdate, UserId};
use boxoffice_testing::fixtures::{billing, new_ticket_type};
use boxoffice_testing::{InMemoryInventoryStore, ManualClock, MockPaymentGateway, test_epoch};
use chrono::Duration;
use std::sync::Arc;
use ticketing::{CheckoutLine, CheckoutRequest, CheckoutService};

fn service() -> (CheckoutService, ManualClock) {
    let clock = ManualClock::new(test_epoch());
    let checkout = CheckoutService::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(clock.clone()),
        MockPaymentGateway::shared(),
    );
    (checkout, clock)
}

fn request(event_id: EventId, ticket_type_id: TicketTypeId, quantity: u32) -> CheckoutRequest {
    CheckoutRequest {
        user_id: UserId::new(),
        event_id,
        lines: vec![CheckoutLine {
            ticket_type_id,
            quantity,
        }],
        billing: billing(),
    }
}

#[tokio::test]
async fn test_create_validates_input() {
    let (checkout, clock) = service();
    let ledger = checkout.ledger();
    let event_id = EventId::new();
    let now = clock.now();

    let negative_price = NewTicketType {
        price: -1,
        ..new_ticket_type(event_id, "VIP", 10, now)
    };
    assert!(matches!(ledger.create(negative_price).await, Err(InventoryError::Validation(_))));

    let no_units = new_ticket_type(event_id, "VIP", 0, now);
    assert!(matches!(ledger.create(no_units).await, Err(InventoryError::Validation(_))));

    let short_window = NewTicketType {
        sale_start: now,
        sale_end: now + Duration::minutes(59),
        ..new_ticket_type(event_id, "VIP", 10, now)
    };
    assert!(matches!(ledger.create(short_window).await, Err(InventoryError::Validation(_))));

    let free = NewTicketType {
        price: 0,
        ..new_ticket_type(event_id, "Community", 25, now)
    };
    let created = ledger.create(free).await.unwrap();
    assert_eq!(created.sold, 0);
    assert_eq!(created.quantity, 25);
    assert_eq!(created.version, 0);

    let listed = ledger.list_for_event(event_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
    assert!(ledger.list_for_event(EventId::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_quantity_cannot_drop_below_sold() {
    let (checkout, clock) = service();
    let event_id = EventId::new();
    let ticket_type = checkout
        .ledger()
        .create(new_ticket_type(event_id, "General", 10, clock.now()))
        .await
        .unwrap();

    checkout.checkout(request(event_id, ticket_type.id, 6)).await.unwrap();

    let shrink = TicketTypeUpdate {
        quantity: Some(5),
        ..TicketTypeUpdate::default()
    };
    assert!(matches!(
        checkout.ledger().update(ticket_type.id, shrink).await,
        Err(InventoryError::QuantityBelowSold { quantity: 5, sold: 6 })
    ));

    let to_sold = TicketTypeUpdate {
        quantity: Some(6),
        name: Some("General (final release)".to_string()),
        ..TicketTypeUpdate::default()
    };
    let updated = checkout.ledger().update(ticket_type.id, to_sold).await.unwrap();
    assert_eq!(updated.quantity, 6);
    assert_eq!(updated.sold, 6);
    assert_eq!(updated.name, "General (final release)");

    let sold_out = checkout.checkout(request(event_id, ticket_type.id, 1)).await;
    assert!(matches!(
        sold_out,
        Err(ticketing::CheckoutError::Inventory(InventoryError::InsufficientStock { .. }))
    ));
}

#[tokio::test]
async fn test_delete_refused_once_anything_sold() {
    let (checkout, clock) = service();
    let event_id = EventId::new();
    let ledger = checkout.ledger();
    let unsold = ledger
        .create(new_ticket_type(event_id, "Balcony", 10, clock.now()))
        .await
        .unwrap();
    let popular = ledger
        .create(new_ticket_type(event_id, "Floor", 10, clock.now()))
        .await
        .unwrap();

    checkout.checkout(request(event_id, popular.id, 1)).await.unwrap();

    assert!(matches!(
        ledger.delete(popular.id).await,
        Err(InventoryError::TicketTypeHasSales { sold: 1, .. })
    ));
    ledger.delete(unsold.id).await.unwrap();
    assert!(matches!(
        ledger.get(unsold.id).await,
        Err(InventoryError::TicketTypeNotFound(_))
    ));
}

#[tokio::test]
async fn test_manual_adjustment_respects_bounds_and_versions() {
    let (checkout, clock) = service();
    let ledger = checkout.ledger();
    let ticket_type = ledger
        .create(new_ticket_type(EventId::new(), "General", 10, clock.now()))
        .await
        .unwrap();

    let adjusted = ledger.adjust(ticket_type.id, 3, Some(ticket_type.version)).await.unwrap();
    assert_eq!(adjusted.sold, 3);
    assert_eq!(adjusted.version, ticket_type.version + 1);

    assert!(matches!(
        ledger.adjust(ticket_type.id, 1, Some(ticket_type.version)).await,
        Err(InventoryError::VersionConflict { .. })
    ));
    assert!(matches!(
        ledger.adjust(ticket_type.id, -4, None).await,
        Err(InventoryError::InventoryUnderflow { sold: 3, delta: -4, .. })
    ));
    assert!(matches!(
        ledger.adjust(ticket_type.id, 8, None).await,
        Err(InventoryError::InsufficientStock { .. })
    ));
    assert!(matches!(
        ledger.adjust(ticket_type.id, 0, None).await,
        Err(InventoryError::Validation(_))
    ));

    let restored = ledger.adjust(ticket_type.id, -3, None).await.unwrap();
    assert_eq!(restored.sold, 0);
}

#[tokio::test]
async fn test_availability_splits_held_and_issued() {
    let (checkout, clock) = service();
    let event_id = EventId::new();
    let ticket_type = checkout
        .ledger()
        .create(new_ticket_type(event_id, "General", 20, clock.now()))
        .await
        .unwrap();

    let paid = checkout.checkout(request(event_id, ticket_type.id, 2)).await.unwrap();
    checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(paid.order.id, "pay_1"))
        .await
        .unwrap();
    checkout.checkout(request(event_id, ticket_type.id, 5)).await.unwrap();

    let report = checkout.availability(event_id).await.unwrap();
    assert_eq!(report.len(), 1);
    let row = &report[0];
    assert_eq!(row.quantity, 20);
    assert_eq!(row.sold, 7);
    assert_eq!(row.held, 5);
    assert_eq!(row.issued, 2);
    assert_eq!(row.available, 13);
    assert!(row.on_sale);

    // Past the sale window
    clock.advance(Duration::days(7));
    let closed = checkout.ledger().availability(event_id).await.unwrap();
    assert!(!closed[0].on_sale);
}

#[tokio::test]
async fn test_extreme_adjustments_are_rejected_and_store_stays_usable() {
    let (checkout, clock) = service();
    let ledger = checkout.ledger();
    let ticket_type = ledger
        .create(new_ticket_type(EventId::new(), "General", 10, clock.now()))
        .await
        .unwrap();
    ledger.adjust(ticket_type.id, 1, None).await.unwrap();

    assert!(matches!(
        ledger.adjust(ticket_type.id, i64::MAX, None).await,
        Err(InventoryError::InsufficientStock { .. })
    ));
    assert!(matches!(
        ledger.adjust(ticket_type.id, i64::MIN, None).await,
        Err(InventoryError::InventoryUnderflow { sold: 1, .. })
    ));

    let current = ledger.get(ticket_type.id).await.unwrap();
    assert_eq!(current.sold, 1);
    assert_eq!(current.version, 1);
}
