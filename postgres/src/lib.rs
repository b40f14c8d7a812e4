//! `PostgreSQL` inventory store for Box Office.
//!
//! Implements [`InventoryStore`] on sqlx. Every method runs in one
//! transaction. Contended rows are taken with `SELECT … FOR UPDATE`, always in
//! the same order so concurrent transactions cannot deadlock each other:
//!
//! 1. the order row
//! 2. reservation rows, ascending id
//! 3. ticket-type rows, ascending id
//!
//! Each transaction sets `lock_timeout`, so a caller blocked behind a long
//! holder gets a retryable [`InventoryError::Transient`] instead of waiting
//! indefinitely.
//!
//! # Example
//!
//! ```no_run
//! use boxoffice_postgres::PostgresInventoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresInventoryStore::new("postgres://localhost/boxoffice").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod rows;

use boxoffice_core::error::{InventoryError, Result};
use boxoffice_core::fulfillment::{check_repeat_completion, reconcile_specs};
use boxoffice_core::order::check_attachable;
use boxoffice_core::store::{
    CancelOutcome, FulfillmentOutcome, FulfillmentRequest, InventoryStore, OrderInsert,
    ReleaseOutcome, StoreFuture,
};
use boxoffice_core::types::{
    EventId, NewReservation, Order, OrderId, OrderNumber, OrderStatus, Reservation, ReservationId,
    ReservationStatus, Ticket, TicketStatus, TicketType, TicketTypeId, TicketTypeUpdate,
};
use chrono::{DateTime, Utc};
use error::map_sqlx;
use rows::{
    OrderRow, ReservationRow, TicketRow, TicketTypeRow, convert_all, order_columns,
    reservation_columns, ticket_columns, ticket_type_columns, to_i32, to_i64,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Default `lock_timeout` applied to every transaction.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2000;

/// `PostgreSQL`-backed [`InventoryStore`].
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PostgresInventoryStore {
    /// Connect with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Transient`] or [`InventoryError::Storage`]
    /// if the database cannot be reached.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// Override the per-transaction `lock_timeout`.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InventoryError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        // SET cannot take bind parameters; the value is an integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(tx)
    }

    // ------------------------------------------------------------------
    // Ticket types
    // ------------------------------------------------------------------

    #[tracing::instrument(skip(self, ticket_type), fields(ticket_type_id = %ticket_type.id))]
    async fn insert_ticket_type_tx(&self, ticket_type: TicketType) -> Result<TicketType> {
        sqlx::query(
            "INSERT INTO ticket_types (id, event_id, name, price, quantity, sold, sale_start, sale_end, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(ticket_type.id.as_uuid())
        .bind(ticket_type.event_id.as_uuid())
        .bind(&ticket_type.name)
        .bind(to_i64(ticket_type.price.minor(), "price")?)
        .bind(to_i32(ticket_type.quantity, "quantity")?)
        .bind(to_i32(ticket_type.sold, "sold")?)
        .bind(ticket_type.sale_window.start())
        .bind(ticket_type.sale_window.end())
        .bind(to_i64(ticket_type.version, "version")?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(ticket_type)
    }

    async fn ticket_type_by_id(&self, id: TicketTypeId) -> Result<Option<TicketType>> {
        let row: Option<TicketTypeRow> = sqlx::query_as(concat!(
            "SELECT ",
            ticket_type_columns!(),
            " FROM ticket_types WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(TicketType::try_from).transpose()
    }

    async fn ticket_types_for_event_query(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        let rows: Vec<TicketTypeRow> = sqlx::query_as(concat!(
            "SELECT ",
            ticket_type_columns!(),
            " FROM ticket_types WHERE event_id = $1 ORDER BY name, id"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        convert_all(rows)
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_ticket_type_tx(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> Result<TicketType> {
        let mut tx = self.begin().await?;
        let mut ticket_type = lock_ticket_type(&mut tx, id).await?;
        ticket_type.apply_update(&update)?;
        write_ticket_type(&mut tx, &ticket_type).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(ticket_type)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_ticket_type_tx(&self, id: TicketTypeId) -> Result<()> {
        let mut tx = self.begin().await?;
        lock_ticket_type(&mut tx, id).await?.ensure_deletable()?;
        sqlx::query("DELETE FROM ticket_types WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn adjust_inventory_tx(
        &self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> Result<TicketType> {
        let mut tx = self.begin().await?;
        let ticket_type = adjust_locked(&mut tx, id, delta, expected_version).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(ticket_type)
    }

    async fn held_quantity_query(&self, id: TicketTypeId) -> Result<u32> {
        let held: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM reservations
             WHERE ticket_type_id = $1 AND status = 'held'",
        )
        .bind(id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        u32::try_from(held).map_err(|_| InventoryError::Storage(format!("held quantity {held} out of range")))
    }

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    #[tracing::instrument(skip(self, request), fields(ticket_type_id = %request.ticket_type_id, quantity = request.quantity))]
    async fn hold_inventory_tx(
        &self,
        request: NewReservation,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.begin().await?;

        let mut ticket_type = lock_ticket_type(&mut tx, request.ticket_type_id).await?;
        ticket_type.check_reservable(request.quantity, now)?;
        ticket_type.apply_delta(i64::from(request.quantity), None)?;
        write_ticket_type(&mut tx, &ticket_type).await?;

        let reservation = Reservation::held(request, now);
        sqlx::query(
            "INSERT INTO reservations (id, ticket_type_id, owner_id, order_id, quantity, status, expires_at, created_at)
             VALUES ($1, $2, $3, NULL, $4, $5, $6, $7)",
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.ticket_type_id.as_uuid())
        .bind(reservation.owner_id.as_uuid())
        .bind(to_i32(reservation.quantity, "quantity")?)
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        tracing::debug!(sold = ticket_type.sold, version = ticket_type.version, "Hold committed");
        Ok(reservation)
    }

    #[tracing::instrument(skip(self))]
    async fn release_reservation_tx(&self, id: ReservationId) -> Result<ReleaseOutcome> {
        let mut tx = self.begin().await?;

        let row: Option<ReservationRow> = sqlx::query_as(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let reservation = Reservation::try_from(row.ok_or(InventoryError::ReservationNotFound(id))?)?;

        if !reservation.ensure_releasable()? {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        let ticket_type = adjust_locked(
            &mut tx,
            reservation.ticket_type_id,
            -i64::from(reservation.quantity),
            None,
        )
        .await?;
        set_reservation_status(&mut tx, &[reservation.id], ReservationStatus::Released).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(ReleaseOutcome::Released(ticket_type))
    }

    async fn reservation_by_id(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let row: Option<ReservationRow> = sqlx::query_as(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn reservations_for_order_query(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows: Vec<ReservationRow> = sqlx::query_as(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE order_id = $1 ORDER BY created_at, id"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        convert_all(rows)
    }

    async fn expired_orphans_query(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ReservationId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM reservations
             WHERE status = 'held' AND order_id IS NULL AND expires_at <= $1
             ORDER BY expires_at, id
             LIMIT $2",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(ids.into_iter().map(ReservationId::from_uuid).collect())
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    #[tracing::instrument(skip(self, insert), fields(order_id = %insert.order.id, order_number = %insert.order.order_number))]
    async fn insert_order_tx(&self, insert: OrderInsert) -> Result<Order> {
        let OrderInsert {
            order,
            mut reservation_ids,
        } = insert;
        let requested = reservation_ids.len();
        reservation_ids.sort();
        reservation_ids.dedup();
        if reservation_ids.len() != requested {
            return Err(InventoryError::ReservationMismatch(
                "a reservation is listed twice".to_string(),
            ));
        }

        let mut tx = self.begin().await?;

        let ids: Vec<Uuid> = reservation_ids.iter().map(|id| *id.as_uuid()).collect();
        let reservations = lock_reservations(&mut tx, &ids).await?;
        if let Some(missing) = reservation_ids
            .iter()
            .find(|id| !reservations.iter().any(|r| r.id == **id))
        {
            return Err(InventoryError::ReservationNotFound(*missing));
        }

        let type_ids: Vec<Uuid> = reservations
            .iter()
            .map(|r| *r.ticket_type_id.as_uuid())
            .collect();
        let events: HashMap<Uuid, Uuid> = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT id, event_id FROM ticket_types WHERE id = ANY($1)",
        )
        .bind(&type_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?
        .into_iter()
        .collect();

        for reservation in &reservations {
            let event_id = events
                .get(reservation.ticket_type_id.as_uuid())
                .copied()
                .map(EventId::from_uuid)
                .ok_or(InventoryError::TicketTypeNotFound(reservation.ticket_type_id))?;
            check_attachable(&order, reservation, event_id)?;
        }

        let inserted = sqlx::query(
            "INSERT INTO orders (id, user_id, event_id, order_number, total_amount, status, payment_id,
                                 billing_email, billing_name, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9, $10)
             ON CONFLICT (order_number) DO NOTHING",
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.event_id.as_uuid())
        .bind(order.order_number.as_str())
        .bind(to_i64(order.total_amount.minor(), "total_amount")?)
        .bind(order.status.as_str())
        .bind(&order.billing.email)
        .bind(&order.billing.name)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if inserted.rows_affected() == 0 {
            return Err(InventoryError::DuplicateOrderNumber(
                order.order_number.to_string(),
            ));
        }

        sqlx::query("UPDATE reservations SET order_id = $1 WHERE id = ANY($2)")
            .bind(order.id.as_uuid())
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(order)
    }

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Order::try_from).transpose()
    }

    async fn order_by_number_query(&self, number: OrderNumber) -> Result<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as(concat!(
            "SELECT ",
            order_columns!(),
            " FROM orders WHERE order_number = $1"
        ))
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        row.map(Order::try_from).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_order_tx(&self, id: OrderId, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tx = self.begin().await?;

        let order = lock_order(&mut tx, id).await?;
        if order.status != OrderStatus::Pending {
            return Ok(CancelOutcome::NotPending(order));
        }

        let released_units = release_order_holds(&mut tx, id).await?;
        let order = set_order_status(&mut tx, id, OrderStatus::Pending, OrderStatus::Cancelled, None, now).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(CancelOutcome::Cancelled {
            order,
            released_units,
        })
    }

    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, units = request.specs.len()))]
    async fn complete_order_tx(&self, request: FulfillmentRequest) -> Result<FulfillmentOutcome> {
        let mut tx = self.begin().await?;

        let order = lock_order(&mut tx, request.order_id).await?;
        if order.status != OrderStatus::Pending {
            check_repeat_completion(&order, &request.payment_reference)?;
            let tickets = tickets_for_order_in(&mut tx, order.id).await?;
            return Ok(FulfillmentOutcome::AlreadyCompleted { order, tickets });
        }

        let reservations: Vec<Reservation> = convert_all(
            sqlx::query_as::<_, ReservationRow>(concat!(
                "SELECT ",
                reservation_columns!(),
                " FROM reservations WHERE order_id = $1 ORDER BY id FOR UPDATE"
            ))
            .bind(order.id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?,
        )?;
        reconcile_specs(&request.specs, &reservations)?;

        let reservation_ids: Vec<ReservationId> = reservations.iter().map(|r| r.id).collect();
        set_reservation_status(&mut tx, &reservation_ids, ReservationStatus::Consumed).await?;

        for ticket in &request.tickets {
            sqlx::query(
                "INSERT INTO tickets (id, order_id, ticket_type_id, qr_code, status, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(ticket.id.as_uuid())
            .bind(ticket.order_id.as_uuid())
            .bind(ticket.ticket_type_id.as_uuid())
            .bind(ticket.qr_code.as_str())
            .bind(ticket.status.as_str())
            .bind(ticket.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        let order = set_order_status(
            &mut tx,
            order.id,
            OrderStatus::Pending,
            OrderStatus::Completed,
            Some(&request.payment_reference),
            request.now,
        )
        .await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(FulfillmentOutcome::Completed {
            order,
            tickets: request.tickets,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn refund_order_tx(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order> {
        let mut tx = self.begin().await?;

        let order = lock_order(&mut tx, id).await?;
        order.ensure_transition(OrderStatus::Refunded)?;
        sqlx::query("UPDATE tickets SET status = $2 WHERE order_id = $1")
            .bind(id.as_uuid())
            .bind(TicketStatus::Refunded.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let order = set_order_status(&mut tx, id, OrderStatus::Completed, OrderStatus::Refunded, None, now).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_order_tx(&self, id: OrderId) -> Result<()> {
        let mut tx = self.begin().await?;

        let order = lock_order(&mut tx, id).await?;
        let ticket_count = tickets_for_order_in(&mut tx, id).await?.len();
        order.ensure_deletable(ticket_count)?;

        release_order_holds(&mut tx, id).await?;
        sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn stale_pending_orders_query(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OrderId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM orders
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at, id
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(ids.into_iter().map(OrderId::from_uuid).collect())
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    async fn tickets_for_order_query(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        tickets_for_order_in(&mut conn, order_id).await
    }

    #[tracing::instrument(skip(self, qr_code))]
    async fn redeem_ticket_tx(&self, qr_code: String) -> Result<Ticket> {
        let mut tx = self.begin().await?;

        let row: Option<TicketRow> = sqlx::query_as(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE qr_code = $1 FOR UPDATE"
        ))
        .bind(&qr_code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        let mut ticket = Ticket::try_from(row.ok_or(InventoryError::TicketNotFound(qr_code))?)?;

        ticket.redeem()?;
        sqlx::query("UPDATE tickets SET status = $2 WHERE id = $1")
            .bind(ticket.id.as_uuid())
            .bind(ticket.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(ticket)
    }
}

// ----------------------------------------------------------------------
// Statements shared inside transactions
// ----------------------------------------------------------------------

async fn lock_ticket_type(conn: &mut PgConnection, id: TicketTypeId) -> Result<TicketType> {
    let row: Option<TicketTypeRow> = sqlx::query_as(concat!(
        "SELECT ",
        ticket_type_columns!(),
        " FROM ticket_types WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    TicketType::try_from(row.ok_or(InventoryError::TicketTypeNotFound(id))?)
}

async fn write_ticket_type(conn: &mut PgConnection, ticket_type: &TicketType) -> Result<()> {
    sqlx::query(
        "UPDATE ticket_types
         SET name = $2, price = $3, quantity = $4, sold = $5,
             sale_start = $6, sale_end = $7, version = $8
         WHERE id = $1",
    )
    .bind(ticket_type.id.as_uuid())
    .bind(&ticket_type.name)
    .bind(to_i64(ticket_type.price.minor(), "price")?)
    .bind(to_i32(ticket_type.quantity, "quantity")?)
    .bind(to_i32(ticket_type.sold, "sold")?)
    .bind(ticket_type.sale_window.start())
    .bind(ticket_type.sale_window.end())
    .bind(to_i64(ticket_type.version, "version")?)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

/// The single mutation path for `sold`: lock, apply the shared rule, write.
async fn adjust_locked(
    conn: &mut PgConnection,
    id: TicketTypeId,
    delta: i64,
    expected_version: Option<u64>,
) -> Result<TicketType> {
    let mut ticket_type = lock_ticket_type(conn, id).await?;
    ticket_type.apply_delta(delta, expected_version)?;
    write_ticket_type(conn, &ticket_type).await?;
    Ok(ticket_type)
}

async fn lock_order(conn: &mut PgConnection, id: OrderId) -> Result<Order> {
    let row: Option<OrderRow> = sqlx::query_as(concat!(
        "SELECT ",
        order_columns!(),
        " FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    Order::try_from(row.ok_or(InventoryError::OrderNotFound(id))?)
}

async fn lock_reservations(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<Reservation>> {
    let rows: Vec<ReservationRow> = sqlx::query_as(concat!(
        "SELECT ",
        reservation_columns!(),
        " FROM reservations WHERE id = ANY($1) ORDER BY id FOR UPDATE"
    ))
    .bind(ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    convert_all(rows)
}

async fn set_reservation_status(
    conn: &mut PgConnection,
    ids: &[ReservationId],
    status: ReservationStatus,
) -> Result<()> {
    let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
    sqlx::query("UPDATE reservations SET status = $2 WHERE id = ANY($1)")
        .bind(&ids)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx)?;
    Ok(())
}

/// Release every held reservation of a locked order. Returns the units freed.
async fn release_order_holds(conn: &mut PgConnection, order_id: OrderId) -> Result<u32> {
    let held: Vec<Reservation> = convert_all(
        sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE order_id = $1 AND status = 'held' ORDER BY id FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx)?,
    )?;

    // BTreeMap keeps ticket-type locks in ascending id order.
    let mut per_type: BTreeMap<TicketTypeId, i64> = BTreeMap::new();
    for reservation in &held {
        *per_type.entry(reservation.ticket_type_id).or_default() += i64::from(reservation.quantity);
    }
    for (ticket_type_id, units) in &per_type {
        adjust_locked(conn, *ticket_type_id, -units, None).await?;
    }

    let ids: Vec<ReservationId> = held.iter().map(|r| r.id).collect();
    set_reservation_status(conn, &ids, ReservationStatus::Released).await?;
    Ok(held.iter().map(|r| r.quantity).sum())
}

/// Conditional status update; fails if the row is no longer in `from`.
async fn set_order_status(
    conn: &mut PgConnection,
    id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
    payment_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Order> {
    let row: Option<OrderRow> = sqlx::query_as(concat!(
        "UPDATE orders SET status = $3, payment_id = COALESCE($4, payment_id), updated_at = $5
         WHERE id = $1 AND status = $2
         RETURNING ",
        order_columns!()
    ))
    .bind(id.as_uuid())
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(payment_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    let row = row.ok_or(InventoryError::InvalidStateTransition {
        order_id: id,
        from,
        to,
    })?;
    Order::try_from(row)
}

async fn tickets_for_order_in(conn: &mut PgConnection, order_id: OrderId) -> Result<Vec<Ticket>> {
    let rows: Vec<TicketRow> = sqlx::query_as(concat!(
        "SELECT ",
        ticket_columns!(),
        " FROM tickets WHERE order_id = $1 ORDER BY created_at, id"
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;
    convert_all(rows)
}

impl InventoryStore for PostgresInventoryStore {
    fn insert_ticket_type(&self, ticket_type: TicketType) -> StoreFuture<'_, TicketType> {
        Box::pin(self.insert_ticket_type_tx(ticket_type))
    }

    fn ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        Box::pin(self.ticket_type_by_id(id))
    }

    fn ticket_types_for_event(&self, event_id: EventId) -> StoreFuture<'_, Vec<TicketType>> {
        Box::pin(self.ticket_types_for_event_query(event_id))
    }

    fn update_ticket_type(
        &self,
        id: TicketTypeId,
        update: TicketTypeUpdate,
    ) -> StoreFuture<'_, TicketType> {
        Box::pin(self.update_ticket_type_tx(id, update))
    }

    fn delete_ticket_type(&self, id: TicketTypeId) -> StoreFuture<'_, ()> {
        Box::pin(self.delete_ticket_type_tx(id))
    }

    fn adjust_inventory(
        &self,
        id: TicketTypeId,
        delta: i64,
        expected_version: Option<u64>,
    ) -> StoreFuture<'_, TicketType> {
        Box::pin(self.adjust_inventory_tx(id, delta, expected_version))
    }

    fn held_quantity(&self, id: TicketTypeId) -> StoreFuture<'_, u32> {
        Box::pin(self.held_quantity_query(id))
    }

    fn hold_inventory(
        &self,
        reservation: NewReservation,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Reservation> {
        Box::pin(self.hold_inventory_tx(reservation, now))
    }

    fn release_reservation(&self, id: ReservationId) -> StoreFuture<'_, ReleaseOutcome> {
        Box::pin(self.release_reservation_tx(id))
    }

    fn reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(self.reservation_by_id(id))
    }

    fn reservations_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(self.reservations_for_order_query(order_id))
    }

    fn expired_orphan_reservations(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<ReservationId>> {
        Box::pin(self.expired_orphans_query(now, limit))
    }

    fn insert_order(&self, insert: OrderInsert) -> StoreFuture<'_, Order> {
        Box::pin(self.insert_order_tx(insert))
    }

    fn order(&self, id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(self.order_by_id(id))
    }

    fn order_by_number(&self, number: OrderNumber) -> StoreFuture<'_, Option<Order>> {
        Box::pin(self.order_by_number_query(number))
    }

    fn cancel_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(self.cancel_order_tx(id, now))
    }

    fn complete_order(&self, request: FulfillmentRequest) -> StoreFuture<'_, FulfillmentOutcome> {
        Box::pin(self.complete_order_tx(request))
    }

    fn refund_order(&self, id: OrderId, now: DateTime<Utc>) -> StoreFuture<'_, Order> {
        Box::pin(self.refund_order_tx(id, now))
    }

    fn delete_order(&self, id: OrderId) -> StoreFuture<'_, ()> {
        Box::pin(self.delete_order_tx(id))
    }

    fn stale_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<OrderId>> {
        Box::pin(self.stale_pending_orders_query(cutoff, limit))
    }

    fn tickets_for_order(&self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(self.tickets_for_order_query(order_id))
    }

    fn redeem_ticket(&self, qr_code: String) -> StoreFuture<'_, Ticket> {
        Box::pin(self.redeem_ticket_tx(qr_code))
    }
}
