//! Ticket Type Ledger.
//!
//! Owns the sellable ticket classes of each event. Input is validated before
//! any I/O; rules that depend on the stored row (quantity vs. `sold`, deletion
//! with sales) run inside the store transaction.

use crate::environment::Clock;
use crate::error::{InventoryError, Result};
use crate::store::InventoryStore;
use crate::types::{
    EventId, NewTicketType, TicketType, TicketTypeAvailability, TicketTypeId, TicketTypeUpdate,
};
use std::sync::Arc;

/// Service for creating, editing and reporting on ticket types.
#[derive(Clone)]
pub struct TicketTypeLedger {
    store: Arc<dyn InventoryStore>,
    clock: Arc<dyn Clock>,
}

impl TicketTypeLedger {
    /// Creates a new `TicketTypeLedger`
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a ticket type.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for negative price, quantity below one or
    /// a sale window shorter than one hour; store errors otherwise.
    #[tracing::instrument(skip(self, input), fields(event_id = %input.event_id, name = %input.name))]
    pub async fn create(&self, input: NewTicketType) -> Result<TicketType> {
        let ticket_type = TicketType::from_new(TicketTypeId::new(), input)?;
        let created = self.store.insert_ticket_type(ticket_type).await?;

        tracing::info!(
            ticket_type_id = %created.id,
            quantity = created.quantity,
            price = created.price.minor(),
            "Ticket type created"
        );
        Ok(created)
    }

    /// Update a ticket type.
    ///
    /// # Errors
    ///
    /// [`InventoryError::QuantityBelowSold`] when the new quantity is below
    /// the units already sold; validation and store errors otherwise.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, id: TicketTypeId, update: TicketTypeUpdate) -> Result<TicketType> {
        update.validate()?;
        if let (Some(start), Some(end)) = (update.sale_start, update.sale_end) {
            crate::types::SaleWindow::new(start, end)?;
        }

        let updated = self.store.update_ticket_type(id, update).await?;
        tracing::info!(
            ticket_type_id = %id,
            quantity = updated.quantity,
            sold = updated.sold,
            "Ticket type updated"
        );
        Ok(updated)
    }

    /// Delete a ticket type that has sold nothing.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketTypeHasSales`] when `sold > 0`.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: TicketTypeId) -> Result<()> {
        self.store.delete_ticket_type(id).await?;
        tracing::info!(ticket_type_id = %id, "Ticket type deleted");
        Ok(())
    }

    /// Load a ticket type.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketTypeNotFound`] or store errors.
    pub async fn get(&self, id: TicketTypeId) -> Result<TicketType> {
        self.store
            .ticket_type(id)
            .await?
            .ok_or(InventoryError::TicketTypeNotFound(id))
    }

    /// All ticket types of an event.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list_for_event(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        self.store.ticket_types_for_event(event_id).await
    }

    /// Admin correction of `sold`, through the same primitive reservations use.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for a zero delta, and the errors of
    /// [`InventoryStore::adjust_inventory`].
    #[tracing::instrument(skip(self))]
    pub async fn adjust(
        &self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> Result<TicketType> {
        if delta == 0 {
            return Err(InventoryError::Validation("adjustment delta must not be zero".to_string()));
        }

        let adjusted = self.store.adjust_inventory(id, delta, expected_version).await?;
        tracing::warn!(
            ticket_type_id = %id,
            delta,
            sold = adjusted.sold,
            version = adjusted.version,
            "Inventory manually adjusted"
        );
        Ok(adjusted)
    }

    /// Availability of every ticket type of an event.
    ///
    /// Expired but unswept holds still count as held here; callers that want
    /// them reclaimed first run a sweep pass before asking.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn availability(&self, event_id: EventId) -> Result<Vec<TicketTypeAvailability>> {
        let now = self.clock.now();
        let ticket_types = self.store.ticket_types_for_event(event_id).await?;

        let mut report = Vec::with_capacity(ticket_types.len());
        for ticket_type in ticket_types {
            let held = self.store.held_quantity(ticket_type.id).await?.min(ticket_type.sold);
            report.push(TicketTypeAvailability {
                ticket_type_id: ticket_type.id,
                on_sale: ticket_type.is_on_sale(now),
                available: ticket_type.available(),
                issued: ticket_type.sold - held,
                held,
                sold: ticket_type.sold,
                quantity: ticket_type.quantity,
                price: ticket_type.price,
                name: ticket_type.name,
            });
        }
        Ok(report)
    }
}
