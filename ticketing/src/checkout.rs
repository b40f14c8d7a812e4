//! Checkout coordinator.
//!
//! Ties the inventory services to the payment gateway:
//!
//! ```text
//! checkout ──► reserve each line ──► create order ──► payment.initiate ──► redirect
//!                   │                     │                  │
//!                   └── release holds ◄───┘                  └──► cancel order
//!
//! confirmation ──► succeeded ──► complete order, mint tickets
//!              └─► failed    ──► cancel order, release holds
//! ```
//!
//! Every step that fails after inventory was held undoes the holds before the
//! error is returned, so a failed checkout never leaves units stranded until
//! the sweeper comes around.

use crate::config::Config;
use boxoffice_core::environment::Clock;
use boxoffice_core::error::InventoryError;
use boxoffice_core::payment::{PaymentConfirmation, PaymentGateway, PaymentGatewayError, PaymentOutcome};
use boxoffice_core::store::{FulfillmentOutcome, InventoryStore};
use boxoffice_core::types::{
    BillingDetails, EventId, Money, NewOrder, Order, OrderId, OrderStatus, Reservation,
    ReservationStatus, ReservationToken, TicketSpec, TicketTypeAvailability, TicketTypeId, UserId,
};
use boxoffice_core::{
    ExpirySweeper, Fulfillment, OrderStateMachine, ReservationManager, TicketTypeLedger,
};
use boxoffice_runtime::{RetryPolicy, retry_transient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Checkout failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    /// An inventory step failed.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// The gateway could not open a payment session.
    #[error("Payment could not be started: {0}")]
    Payment(#[from] PaymentGatewayError),
}

/// One line of a checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    /// Ticket type to buy
    pub ticket_type_id: TicketTypeId,
    /// Units
    pub quantity: u32,
}

/// Input for [`CheckoutService::checkout`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Buyer
    pub user_id: UserId,
    /// Event being bought
    pub event_id: EventId,
    /// What to buy
    pub lines: Vec<CheckoutLine>,
    /// Billing snapshot
    pub billing: BillingDetails,
}

/// A started checkout waiting for payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// The pending order
    pub order: Order,
    /// Where to send the buyer
    pub redirect_url: String,
    /// Holds backing the order
    pub reservations: Vec<ReservationToken>,
}

/// What a payment confirmation did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Payment succeeded; the order is completed (now or by an earlier delivery).
    Fulfilled(FulfillmentOutcome),
    /// Payment failed; the order was cancelled and its holds released.
    Cancelled(Order),
    /// Payment failed but the order had already left `pending`.
    AlreadyFinal(Order),
}

/// Coordinates reservation, order creation, payment and fulfillment.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn InventoryStore>,
    ledger: TicketTypeLedger,
    reservations: ReservationManager,
    orders: OrderStateMachine,
    fulfillment: Fulfillment,
    sweeper: ExpirySweeper,
    payment: Arc<dyn PaymentGateway>,
    retry: RetryPolicy,
}

impl CheckoutService {
    /// Creates a new `CheckoutService` with default TTL and retry policy
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        clock: Arc<dyn Clock>,
        payment: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            ledger: TicketTypeLedger::new(Arc::clone(&store), Arc::clone(&clock)),
            reservations: ReservationManager::new(Arc::clone(&store), Arc::clone(&clock)),
            orders: OrderStateMachine::new(Arc::clone(&store), Arc::clone(&clock)),
            fulfillment: Fulfillment::new(Arc::clone(&store), Arc::clone(&clock)),
            sweeper: ExpirySweeper::new(Arc::clone(&store), clock),
            store,
            payment,
            retry: RetryPolicy::default(),
        }
    }

    /// Build from loaded configuration.
    #[must_use]
    pub fn from_config(
        config: &Config,
        store: Arc<dyn InventoryStore>,
        clock: Arc<dyn Clock>,
        payment: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self::new(store, clock, payment)
            .with_reservation_ttl(config.reservation_ttl())
            .with_order_number_attempts(config.inventory.order_number_max_attempts)
            .with_sweep_batch_size(config.sweeper.batch_size)
    }

    /// Hold lifetime, also used as the sweeper's abandonment age.
    #[must_use]
    pub fn with_reservation_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.reservations = self.reservations.with_default_ttl(ttl);
        self.sweeper = self.sweeper.with_ttl(ttl);
        self
    }

    /// Order-number collision budget.
    #[must_use]
    pub fn with_order_number_attempts(mut self, attempts: u32) -> Self {
        self.orders = self.orders.with_max_number_attempts(attempts);
        self
    }

    /// Batch size of the sweep run before availability reports.
    #[must_use]
    pub fn with_sweep_batch_size(mut self, batch_size: u32) -> Self {
        self.sweeper = self.sweeper.with_batch_size(batch_size);
        self
    }

    /// Retry policy for reservation attempts that hit transient errors.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The ticket type ledger.
    #[must_use]
    pub const fn ledger(&self) -> &TicketTypeLedger {
        &self.ledger
    }

    /// The order state machine.
    #[must_use]
    pub const fn orders(&self) -> &OrderStateMachine {
        &self.orders
    }

    /// The fulfillment service.
    #[must_use]
    pub const fn fulfillment(&self) -> &Fulfillment {
        &self.fulfillment
    }

    /// Reserve every line, create a pending order and open a payment session.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Inventory`]: a line could not be held, a ticket type
    ///   belongs to another event, or the order could not be created
    /// - [`CheckoutError::Payment`]: the gateway refused; the order is cancelled
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, event_id = %request.event_id, lines = request.lines.len()))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutSession, CheckoutError> {
        if request.lines.is_empty() {
            return Err(InventoryError::Validation("checkout needs at least one line".to_string()).into());
        }

        let mut holds = Vec::with_capacity(request.lines.len());
        let total = match self.hold_lines(&request, &mut holds).await {
            Ok(total) => total,
            Err(error) => {
                self.release_holds(&holds, "reserve").await;
                return Err(error.into());
            }
        };

        let new_order = NewOrder {
            user_id: request.user_id,
            event_id: request.event_id,
            total_amount: total,
            billing: request.billing,
            reservation_ids: holds.iter().map(|h| h.reservation_id).collect(),
        };
        let order = match self.orders.create(new_order).await {
            Ok(order) => order,
            Err(error) => {
                self.release_holds(&holds, "create_order").await;
                return Err(error.into());
            }
        };

        match self.payment.initiate(order.id, total).await {
            Ok(redirect_url) => {
                metrics::counter!("checkouts_started_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = total.minor(),
                    "Checkout started"
                );
                Ok(CheckoutSession {
                    order,
                    redirect_url,
                    reservations: holds,
                })
            }
            Err(error) => {
                metrics::counter!("checkout_compensations_total", "step" => "payment").increment(1);
                tracing::warn!(order_id = %order.id, %error, "Payment session failed, cancelling order");
                if let Err(cancel_error) = self.orders.cancel(order.id).await {
                    tracing::error!(order_id = %order.id, error = %cancel_error, "Could not cancel order after payment failure");
                }
                Err(error.into())
            }
        }
    }

    async fn hold_lines(
        &self,
        request: &CheckoutRequest,
        holds: &mut Vec<ReservationToken>,
    ) -> Result<Money, InventoryError> {
        let mut total = Money::ZERO;
        for line in &request.lines {
            let ticket_type = self.ledger.get(line.ticket_type_id).await?;
            if ticket_type.event_id != request.event_id {
                return Err(InventoryError::Validation(format!(
                    "ticket type {} is not sold for event {}",
                    ticket_type.id, request.event_id
                )));
            }
            total = ticket_type
                .price
                .checked_multiply(line.quantity)
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or_else(|| InventoryError::Validation("order total overflows".to_string()))?;

            let token = retry_transient(&self.retry, || {
                self.reservations
                    .reserve(line.ticket_type_id, line.quantity, request.user_id, None)
            })
            .await?;
            holds.push(token);
        }
        Ok(total)
    }

    async fn release_holds(&self, holds: &[ReservationToken], step: &'static str) {
        if holds.is_empty() {
            return;
        }
        metrics::counter!("checkout_compensations_total", "step" => step).increment(1);
        for hold in holds {
            if let Err(error) = self.reservations.release(hold).await {
                // Left for the sweeper; the hold expires on its own.
                tracing::warn!(reservation_id = %hold.reservation_id, %error, "Compensating release failed");
            }
        }
    }

    /// Apply an asynchronous payment confirmation.
    ///
    /// Deliveries may repeat; a repeated success with the same reference
    /// returns the tickets minted the first time.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::OrderNotFound`]
    /// - [`InventoryError::InvalidStateTransition`]: payment succeeded for an
    ///   order that was already cancelled; the payment needs a refund
    /// - [`InventoryError::ReservationMismatch`]: the order's holds no longer
    ///   match what it was created with
    /// - [`InventoryError::PaymentReferenceConflict`]: completed with another reference
    #[tracing::instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id, success = confirmation.is_success()))]
    pub async fn handle_payment_confirmation(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, InventoryError> {
        let order = self.orders.get(confirmation.order_id).await?;

        match confirmation.outcome {
            PaymentOutcome::Succeeded => {
                let reservations = self.store.reservations_for_order(order.id).await?;
                let specs = ticket_specs(&reservations);
                let result = if specs.is_empty() {
                    Err(self.nothing_to_fulfill(order.id).await?)
                } else {
                    self.fulfillment
                        .complete_order(order.id, &confirmation.reference, specs)
                        .await
                };
                match result {
                    Ok(outcome) => Ok(ConfirmationOutcome::Fulfilled(outcome)),
                    Err(
                        error @ (InventoryError::InvalidStateTransition { .. }
                        | InventoryError::ReservationMismatch(_)),
                    ) => {
                        metrics::counter!("payments_unfulfilled_total").increment(1);
                        tracing::error!(
                            order_id = %order.id,
                            payment_reference = %confirmation.reference,
                            %error,
                            "Payment captured but the order cannot be fulfilled, refund required"
                        );
                        Err(error)
                    }
                    Err(error) => Err(error),
                }
            }
            PaymentOutcome::Failed { reason } => match self.orders.cancel(order.id).await {
                Ok(order) => {
                    metrics::counter!("payment_failures_total").increment(1);
                    tracing::info!(order_id = %order.id, %reason, "Payment failed, order cancelled");
                    Ok(ConfirmationOutcome::Cancelled(order))
                }
                Err(InventoryError::InvalidStateTransition { .. }) => {
                    let order = self.orders.get(order.id).await?;
                    tracing::debug!(order_id = %order.id, status = %order.status, "Payment failure for a settled order ignored");
                    Ok(ConfirmationOutcome::AlreadyFinal(order))
                }
                Err(error) => Err(error),
            },
        }
    }

    /// Why an order with no live holds cannot be fulfilled, judged on a
    /// fresh read: a cancel may have released the holds after the order was
    /// first loaded.
    async fn nothing_to_fulfill(&self, order_id: OrderId) -> Result<InventoryError, InventoryError> {
        let current = self.orders.get(order_id).await?;
        Ok(if current.status == OrderStatus::Pending {
            InventoryError::ReservationMismatch(format!("pending order {order_id} holds no reservations"))
        } else {
            InventoryError::InvalidStateTransition {
                order_id,
                from: current.status,
                to: OrderStatus::Completed,
            }
        })
    }

    /// User-initiated cancellation of a pending order.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`] once the order has left
    /// `pending`, not found or store errors.
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, InventoryError> {
        self.orders.update_status(order_id, OrderStatus::Cancelled).await
    }

    /// Availability of an event's ticket types after reclaiming abandoned holds.
    ///
    /// A failed sweep does not fail the report; expired holds then still
    /// count as held.
    ///
    /// # Errors
    ///
    /// Store errors from the ledger.
    pub async fn availability(&self, event_id: EventId) -> Result<Vec<TicketTypeAvailability>, InventoryError> {
        match self.sweeper.sweep_once().await {
            Ok(report) if report.reclaimed_anything() => {
                tracing::debug!(
                    cancelled = report.cancelled,
                    orphans_released = report.orphans_released,
                    "Reclaimed holds before availability report"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "Sweep before availability report failed");
            }
        }
        self.ledger.availability(event_id).await
    }
}

/// One spec per unit held by the order's unreleased reservations.
fn ticket_specs(reservations: &[Reservation]) -> Vec<TicketSpec> {
    reservations
        .iter()
        .filter(|r| r.status != ReservationStatus::Released)
        .flat_map(|r| {
            (0..r.quantity).map(|_| TicketSpec {
                ticket_type_id: r.ticket_type_id,
            })
        })
        .collect()
}
