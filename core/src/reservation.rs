//! Reservation Manager.
//!
//! Holds inventory for a checkout attempt and gives it back. The hold itself
//! is a single store transaction: lock the ticket-type row, re-check the sale
//! window and availability, add to `sold`, insert a `held` reservation row.
//! That row lock is what keeps concurrent reservations for the same ticket
//! type from overselling.

use crate::environment::Clock;
use crate::error::{InventoryError, Result};
use crate::store::{InventoryStore, ReleaseOutcome};
use crate::types::{
    NewReservation, Reservation, ReservationId, ReservationStatus, ReservationToken, TicketTypeId,
    UserId,
};
use chrono::Duration;
use std::sync::Arc;

/// Default hold time before an unpaid reservation is swept.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

impl Reservation {
    /// Decides what a standalone release should do with this reservation.
    ///
    /// Returns `Ok(true)` when the units must go back to the pool and
    /// `Ok(false)` when the reservation was already released. Holds attached
    /// to an order are only freed by cancelling or deleting that order.
    ///
    /// # Errors
    ///
    /// [`InventoryError::ReservationMismatch`] when the reservation backs an
    /// order or was consumed by fulfillment.
    pub fn ensure_releasable(&self) -> Result<bool> {
        match self.status {
            ReservationStatus::Held => match self.order_id {
                None => Ok(true),
                Some(order_id) => Err(InventoryError::ReservationMismatch(format!(
                    "reservation {} backs order {order_id}; cancel the order instead",
                    self.id
                ))),
            },
            ReservationStatus::Released => Ok(false),
            ReservationStatus::Consumed => Err(InventoryError::ReservationMismatch(format!(
                "reservation {} was consumed and cannot be released",
                self.id
            ))),
        }
    }
}

/// Service that holds and releases inventory.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl ReservationManager {
    /// Creates a new `ReservationManager` with the default 15 minute TTL
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }

    /// Override the TTL used when `reserve` is called without one.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// The TTL used when `reserve` is called without one.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Hold `quantity` units of a ticket type for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`]: `quantity < 1` or non-positive `ttl`
    /// - [`InventoryError::InsufficientStock`]: fewer than `quantity` units left
    /// - [`InventoryError::SaleNotStarted`] / [`InventoryError::SaleEnded`]
    /// - [`InventoryError::Transient`]: lock timeout or connectivity, safe to retry
    #[tracing::instrument(skip(self, ttl))]
    pub async fn reserve(
        &self,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        user_id: UserId,
        ttl: Option<Duration>,
    ) -> Result<ReservationToken> {
        if quantity == 0 {
            return Err(InventoryError::Validation("quantity must be at least 1".to_string()));
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(InventoryError::Validation(format!(
                "reservation ttl must be positive (got {}s)",
                ttl.num_seconds()
            )));
        }

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            InventoryError::Validation(format!("reservation ttl of {}s is out of range", ttl.num_seconds()))
        })?;
        let request = NewReservation {
            id: ReservationId::new(),
            ticket_type_id,
            owner_id: user_id,
            quantity,
            expires_at,
        };

        match self.store.hold_inventory(request, now).await {
            Ok(reservation) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "held").increment(1);
                metrics::counter!("inventory_units_held_total").increment(u64::from(quantity));
                tracing::info!(
                    reservation_id = %reservation.id,
                    ticket_type_id = %ticket_type_id,
                    quantity,
                    expires_at = %reservation.expires_at,
                    "Inventory reserved"
                );
                Ok(reservation.token())
            }
            Err(error) => {
                metrics::counter!("inventory_reservations_total", "outcome" => error.label())
                    .increment(1);
                if error.is_retryable() {
                    tracing::warn!(ticket_type_id = %ticket_type_id, %error, "Reservation hit transient store error");
                } else {
                    tracing::info!(ticket_type_id = %ticket_type_id, quantity, %error, "Reservation rejected");
                }
                Err(error)
            }
        }
    }

    /// Give a reservation's units back to the pool.
    ///
    /// Releasing twice is detected and reported as
    /// [`ReleaseOutcome::AlreadyReleased`]; `sold` only moves once.
    ///
    /// # Errors
    ///
    /// [`InventoryError::ReservationNotFound`], [`InventoryError::ReservationMismatch`]
    /// for consumed reservations or holds attached to an order, or store errors.
    pub async fn release(&self, token: &ReservationToken) -> Result<ReleaseOutcome> {
        self.release_by_id(token.reservation_id).await
    }

    /// Same as [`Self::release`] when only the ID is at hand.
    ///
    /// # Errors
    ///
    /// See [`Self::release`].
    #[tracing::instrument(skip(self))]
    pub async fn release_by_id(&self, reservation_id: ReservationId) -> Result<ReleaseOutcome> {
        let outcome = self.store.release_reservation(reservation_id).await?;
        match &outcome {
            ReleaseOutcome::Released(ticket_type) => {
                metrics::counter!("inventory_releases_total").increment(1);
                tracing::info!(
                    reservation_id = %reservation_id,
                    ticket_type_id = %ticket_type.id,
                    sold = ticket_type.sold,
                    "Reservation released"
                );
            }
            ReleaseOutcome::AlreadyReleased => {
                tracing::debug!(reservation_id = %reservation_id, "Reservation already released");
            }
        }
        Ok(outcome)
    }

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// [`InventoryError::ReservationNotFound`] or store errors.
    pub async fn get(&self, reservation_id: ReservationId) -> Result<Reservation> {
        self.store
            .reservation(reservation_id)
            .await?
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::NewReservation;
    use chrono::Utc;

    fn reservation(status: ReservationStatus) -> Reservation {
        let mut reservation = Reservation::held(
            NewReservation {
                id: ReservationId::new(),
                ticket_type_id: TicketTypeId::new(),
                owner_id: UserId::new(),
                quantity: 2,
                expires_at: Utc::now(),
            },
            Utc::now(),
        );
        reservation.status = status;
        reservation
    }

    #[test]
    fn held_reservations_are_released() {
        assert!(reservation(ReservationStatus::Held).ensure_releasable().unwrap());
    }

    #[test]
    fn double_release_is_detected() {
        assert!(!reservation(ReservationStatus::Released).ensure_releasable().unwrap());
    }

    #[test]
    fn consumed_reservations_cannot_be_released() {
        assert!(matches!(
            reservation(ReservationStatus::Consumed).ensure_releasable(),
            Err(InventoryError::ReservationMismatch(_))
        ));
    }

    #[test]
    fn attached_holds_are_not_released_alone() {
        let mut attached = reservation(ReservationStatus::Held);
        attached.order_id = Some(crate::types::OrderId::new());
        assert!(matches!(
            attached.ensure_releasable(),
            Err(InventoryError::ReservationMismatch(_))
        ));

        attached.status = ReservationStatus::Released;
        assert!(!attached.ensure_releasable().unwrap());
    }

    #[test]
    fn token_mirrors_reservation() {
        let reservation = reservation(ReservationStatus::Held);
        let token = reservation.token();
        assert_eq!(token.reservation_id, reservation.id);
        assert_eq!(token.quantity, 2);
        assert_eq!(token.expires_at, reservation.expires_at);
    }
}
