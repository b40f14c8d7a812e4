//! Row types and their conversion into domain types.
//!
//! Integer columns are signed in `PostgreSQL`; every narrowing conversion is
//! checked and a row that fails one is reported as a storage fault.

use boxoffice_core::error::{InventoryError, Result};
use boxoffice_core::types::{
    BillingDetails, EventId, Money, Order, OrderId, OrderNumber, OrderStatus, QrCode, Reservation,
    ReservationId, ReservationStatus, SaleWindow, Ticket, TicketId, TicketStatus, TicketType,
    TicketTypeId, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

macro_rules! ticket_type_columns {
    () => {
        "id, event_id, name, price, quantity, sold, sale_start, sale_end, version"
    };
}

macro_rules! reservation_columns {
    () => {
        "id, ticket_type_id, owner_id, order_id, quantity, status, expires_at, created_at"
    };
}

macro_rules! order_columns {
    () => {
        "id, user_id, event_id, order_number, total_amount, status, payment_id, \
         billing_email, billing_name, created_at, updated_at"
    };
}

macro_rules! ticket_columns {
    () => {
        "id, order_id, ticket_type_id, qr_code, status, created_at"
    };
}

pub(crate) use {order_columns, reservation_columns, ticket_columns, ticket_type_columns};

fn corrupt(table: &str, error: impl std::fmt::Display) -> InventoryError {
    InventoryError::Storage(format!("corrupt {table} row: {error}"))
}

pub(crate) fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| InventoryError::Storage(format!("{what} {value} exceeds INTEGER")))
}

pub(crate) fn to_i64(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| InventoryError::Storage(format!("{what} {value} exceeds BIGINT")))
}

#[derive(Debug, FromRow)]
pub(crate) struct TicketTypeRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    price: i64,
    quantity: i32,
    sold: i32,
    sale_start: DateTime<Utc>,
    sale_end: DateTime<Utc>,
    version: i64,
}

impl TryFrom<TicketTypeRow> for TicketType {
    type Error = InventoryError;

    fn try_from(row: TicketTypeRow) -> Result<Self> {
        Ok(Self {
            id: TicketTypeId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            name: row.name,
            price: Money::try_from_signed(row.price).map_err(|e| corrupt("ticket_types", e))?,
            quantity: u32::try_from(row.quantity).map_err(|e| corrupt("ticket_types", e))?,
            sold: u32::try_from(row.sold).map_err(|e| corrupt("ticket_types", e))?,
            sale_window: SaleWindow::new(row.sale_start, row.sale_end)
                .map_err(|e| corrupt("ticket_types", e))?,
            version: u64::try_from(row.version).map_err(|e| corrupt("ticket_types", e))?,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReservationRow {
    id: Uuid,
    ticket_type_id: Uuid,
    owner_id: Uuid,
    order_id: Option<Uuid>,
    quantity: i32,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = InventoryError;

    fn try_from(row: ReservationRow) -> Result<Self> {
        Ok(Self {
            id: ReservationId::from_uuid(row.id),
            ticket_type_id: TicketTypeId::from_uuid(row.ticket_type_id),
            owner_id: UserId::from_uuid(row.owner_id),
            order_id: row.order_id.map(OrderId::from_uuid),
            quantity: u32::try_from(row.quantity).map_err(|e| corrupt("reservations", e))?,
            status: ReservationStatus::parse(&row.status).map_err(|e| corrupt("reservations", e))?,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    order_number: String,
    total_amount: i64,
    status: String,
    payment_id: Option<String>,
    billing_email: String,
    billing_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = InventoryError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Self {
            id: OrderId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            event_id: EventId::from_uuid(row.event_id),
            order_number: OrderNumber::parse(&row.order_number).map_err(|e| corrupt("orders", e))?,
            total_amount: Money::try_from_signed(row.total_amount).map_err(|e| corrupt("orders", e))?,
            status: OrderStatus::parse(&row.status).map_err(|e| corrupt("orders", e))?,
            payment_id: row.payment_id,
            billing: BillingDetails {
                email: row.billing_email,
                name: row.billing_name,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    order_id: Uuid,
    ticket_type_id: Uuid,
    qr_code: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = InventoryError;

    fn try_from(row: TicketRow) -> Result<Self> {
        Ok(Self {
            id: TicketId::from_uuid(row.id),
            order_id: OrderId::from_uuid(row.order_id),
            ticket_type_id: TicketTypeId::from_uuid(row.ticket_type_id),
            qr_code: QrCode::from_string(row.qr_code),
            status: TicketStatus::parse(&row.status).map_err(|e| corrupt("tickets", e))?,
            created_at: row.created_at,
        })
    }
}

/// Convert a batch of rows, failing on the first corrupt one.
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = InventoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}
