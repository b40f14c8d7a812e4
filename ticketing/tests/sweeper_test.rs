//! Expiry sweeper tests.
//!
//! Abandoned checkouts are reclaimed exactly once, including when a late
//! payment confirmation races the sweep.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use boxoffice_core::environment::Clock;
use boxoffice_core::error::InventoryError;
use boxoffice_core::payment::PaymentConfirmation;
use boxoffice_core::store::InventoryStore;
use boxoffice_core::types::{EventId, OrderStatus, ReservationStatus, TicketType, UserId};
use boxoffice_core::{ExpirySweeper, ReservationManager};
use boxoffice_testing::fixtures::{billing, ticket_type_on_sale};
use boxoffice_testing::{InMemoryInventoryStore, ManualClock, MockPaymentGateway, StoreOp, test_epoch};
use chrono::Duration;
use std::sync::Arc;
use ticketing::{CheckoutLine, CheckoutRequest, CheckoutService, CheckoutSession, ConfirmationOutcome};

struct Fixture {
    store: InMemoryInventoryStore,
    clock: ManualClock,
    checkout: CheckoutService,
    sweeper: ExpirySweeper,
}

fn fixture() -> Fixture {
    let store = InMemoryInventoryStore::new();
    let clock = ManualClock::new(test_epoch());
    let checkout = CheckoutService::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        MockPaymentGateway::shared(),
    );
    let sweeper = ExpirySweeper::new(Arc::new(store.clone()), Arc::new(clock.clone()));
    Fixture {
        store,
        clock,
        checkout,
        sweeper,
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

    async fn start_checkout(&self, ticket_type: &TicketType, quantity: u32) -> CheckoutSession {
        self.checkout
            .checkout(CheckoutRequest {
                user_id: UserId::new(),
                event_id: ticket_type.event_id,
                lines: vec![CheckoutLine {
                    ticket_type_id: ticket_type.id,
                    quantity,
                }],
                billing: billing(),
            })
            .await
            .unwrap()
    }

    async fn status(&self, session: &CheckoutSession) -> OrderStatus {
        self.checkout.orders().get(session.order.id).await.unwrap().status
    }
}

#[tokio::test]
async fn test_abandoned_order_is_cancelled_after_ttl() {
    let f = fixture();
    let general = f.ticket_type(EventId::new(), 10).await;
    let session = f.start_checkout(&general, 3).await;
    assert_eq!(f.sold(&general).await, 3);

    // Not yet stale
    f.clock.advance(Duration::minutes(14));
    let early = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(early.cancelled, 0);
    assert_eq!(f.status(&session).await, OrderStatus::Pending);

    f.clock.advance(Duration::minutes(2));
    let report = f.sweeper.sweep_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(f.status(&session).await, OrderStatus::Cancelled);
    assert_eq!(f.sold(&general).await, 0);

    let hold = f
        .store
        .reservation(session.reservations[0].reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hold.status, ReservationStatus::Released);

    let again = f.sweeper.sweep_once().await.unwrap();
    assert!(!again.reclaimed_anything());
    assert_eq!(f.sold(&general).await, 0);
}

#[tokio::test]
async fn test_completion_before_sweep_wins() {
    let f = fixture();
    let general = f.ticket_type(EventId::new(), 10).await;
    let session = f.start_checkout(&general, 2).await;
    f.clock.advance(Duration::minutes(16));

    // The order is stale but not yet swept; payment still completes it.
    let outcome = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_late"))
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Fulfilled(_)));

    let report = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.cancelled, 0);
    assert_eq!(f.status(&session).await, OrderStatus::Completed);
    assert_eq!(f.sold(&general).await, 2);
    assert_eq!(f.store.ticket_count(), 2);
}

#[tokio::test]
async fn test_sweep_before_completion_wins() {
    let f = fixture();
    let general = f.ticket_type(EventId::new(), 10).await;
    let session = f.start_checkout(&general, 2).await;
    f.clock.advance(Duration::minutes(16));

    let report = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.cancelled, 1);

    let late = f
        .checkout
        .handle_payment_confirmation(PaymentConfirmation::succeeded(session.order.id, "pay_late"))
        .await;
    assert!(matches!(
        late,
        Err(InventoryError::InvalidStateTransition { from: OrderStatus::Cancelled, .. })
    ));
    assert_eq!(f.status(&session).await, OrderStatus::Cancelled);
    assert_eq!(f.sold(&general).await, 0);
    assert_eq!(f.store.ticket_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweep_and_completion_have_one_winner() {
    for _ in 0..20 {
        let f = fixture();
        let general = f.ticket_type(EventId::new(), 10).await;
        let session = f.start_checkout(&general, 3).await;
        f.clock.advance(Duration::minutes(16));

        let sweeper = f.sweeper.clone();
        let checkout = f.checkout.clone();
        let order_id = session.order.id;
        let sweep = tokio::spawn(async move { sweeper.sweep_once().await });
        let confirm = tokio::spawn(async move {
            checkout
                .handle_payment_confirmation(PaymentConfirmation::succeeded(order_id, "pay_race"))
                .await
        });
        let report = sweep.await.unwrap().unwrap();
        let confirmation = confirm.await.unwrap();

        match f.status(&session).await {
            OrderStatus::Completed => {
                assert!(confirmation.is_ok());
                assert_eq!(report.cancelled, 0);
                assert_eq!(f.sold(&general).await, 3);
                assert_eq!(f.store.ticket_count(), 3);
            }
            OrderStatus::Cancelled => {
                assert!(matches!(confirmation, Err(InventoryError::InvalidStateTransition { .. })));
                assert_eq!(report.cancelled, 1);
                assert_eq!(f.sold(&general).await, 0);
                assert_eq!(f.store.ticket_count(), 0);
            }
            other => panic!("unexpected status {other}"),
        }
    }
}

#[tokio::test]
async fn test_orphan_holds_are_released_after_expiry() {
    let f = fixture();
    let general = f.ticket_type(EventId::new(), 10).await;
    let manager = ReservationManager::new(Arc::new(f.store.clone()), Arc::new(f.clock.clone()));

    let short = manager
        .reserve(general.id, 2, UserId::new(), Some(Duration::minutes(5)))
        .await
        .unwrap();
    let long = manager
        .reserve(general.id, 3, UserId::new(), Some(Duration::minutes(30)))
        .await
        .unwrap();

    f.clock.advance(Duration::minutes(6));
    let report = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.orphans_released, 1);
    assert_eq!(f.sold(&general).await, 3);

    let short = manager.get(short.reservation_id).await.unwrap();
    let long = manager.get(long.reservation_id).await.unwrap();
    assert_eq!(short.status, ReservationStatus::Released);
    assert_eq!(long.status, ReservationStatus::Held);
}

#[tokio::test]
async fn test_one_failure_does_not_abort_the_pass() {
    let f = fixture();
    let general = f.ticket_type(EventId::new(), 10).await;
    let first = f.start_checkout(&general, 1).await;
    f.clock.advance(Duration::seconds(1));
    let second = f.start_checkout(&general, 1).await;
    f.clock.advance(Duration::minutes(16));

    f.store.fail_next(
        StoreOp::CancelOrder,
        InventoryError::Transient("lock timeout".to_string()),
    );
    let report = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(f.status(&first).await, OrderStatus::Pending);
    assert_eq!(f.status(&second).await, OrderStatus::Cancelled);

    let retry = f.sweeper.sweep_once().await.unwrap();
    assert_eq!(retry.cancelled, 1);
    assert_eq!(f.sold(&general).await, 0);
}

#[tokio::test]
async fn test_batches_cover_every_stale_order() {
    let store = InMemoryInventoryStore::new();
    let clock = ManualClock::new(test_epoch());
    let checkout = CheckoutService::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        MockPaymentGateway::shared(),
    );
    let sweeper = ExpirySweeper::new(Arc::new(store.clone()), Arc::new(clock.clone())).with_batch_size(2);
    let general = store
        .insert_ticket_type(ticket_type_on_sale(EventId::new(), 20, clock.now()))
        .await
        .unwrap();

    for _ in 0..5 {
        checkout
            .checkout(CheckoutRequest {
                user_id: UserId::new(),
                event_id: general.event_id,
                lines: vec![CheckoutLine {
                    ticket_type_id: general.id,
                    quantity: 2,
                }],
                billing: billing(),
            })
            .await
            .unwrap();
    }
    clock.advance(Duration::minutes(16));

    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.cancelled, 5);
    assert_eq!(store.ticket_type(general.id).await.unwrap().unwrap().sold, 0);
}

#[tokio::test]
async fn test_availability_reclaims_abandoned_holds_first() {
    let f = fixture();
    let event_id = EventId::new();
    let general = f.ticket_type(event_id, 10).await;
    f.start_checkout(&general, 4).await;

    let before = f.checkout.availability(event_id).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].available, 6);
    assert_eq!(before[0].held, 4);
    assert_eq!(before[0].issued, 0);
    assert!(before[0].on_sale);

    f.clock.advance(Duration::minutes(16));
    let after = f.checkout.availability(event_id).await.unwrap();
    assert_eq!(after[0].available, 10);
    assert_eq!(after[0].held, 0);
}

#[tokio::test]
async fn test_configured_ttl_drives_reservations_and_sweeps() {
    let mut config = ticketing::Config::default();
    config.inventory.reservation_ttl_secs = 120;
    config.sweeper.batch_size = 1;

    let store = InMemoryInventoryStore::new();
    let clock = ManualClock::new(test_epoch());
    let checkout = CheckoutService::from_config(
        &config,
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        MockPaymentGateway::shared(),
    );
    let event_id = EventId::new();
    let general = store
        .insert_ticket_type(ticket_type_on_sale(event_id, 10, clock.now()))
        .await
        .unwrap();

    let session = checkout
        .checkout(CheckoutRequest {
            user_id: UserId::new(),
            event_id,
            lines: vec![CheckoutLine {
                ticket_type_id: general.id,
                quantity: 2,
            }],
            billing: billing(),
        })
        .await
        .unwrap();
    assert_eq!(session.reservations[0].expires_at, clock.now() + Duration::seconds(120));

    clock.advance(Duration::seconds(121));
    let report = checkout.availability(event_id).await.unwrap();
    assert_eq!(report[0].available, 10);
    assert_eq!(
        checkout.orders().get(session.order.id).await.unwrap().status,
        OrderStatus::Cancelled
    );
}
