//! Domain types for ticket inventory.
//!
//! Identifiers, money, sale windows, and the four persisted entities:
//! [`TicketType`], [`Reservation`], [`Order`] and [`Ticket`]. The pure rules
//! that guard each entity (bounds on `sold`, legal status transitions) live
//! here so every store backend applies them identically.

use crate::error::{InventoryError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from a `Uuid`
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a ticket type
    TicketTypeId
);
uuid_id!(
    /// Unique identifier for a user (owned by the auth subsystem)
    UserId
);
uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Amount of money in minor currency units (e.g. cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates a `Money` value from a signed amount, rejecting negatives.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if `minor` is negative.
    pub fn try_from_signed(minor: i64) -> Result<Self> {
        u64::try_from(minor)
            .map(Self)
            .map_err(|_| InventoryError::Validation(format!("price must not be negative (got {minor})")))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Sale Window
// ============================================================================

/// Half-open interval `[start, end)` during which a ticket type is on sale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SaleWindow {
    /// Shortest window a ticket type may be sold in.
    #[must_use]
    pub fn minimum_length() -> Duration {
        Duration::hours(1)
    }

    /// Create a sale window.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if `start >= end` or the window
    /// is shorter than one hour.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(InventoryError::Validation(format!(
                "sale start {start} must be before sale end {end}"
            )));
        }
        if end - start < Self::minimum_length() {
            return Err(InventoryError::Validation(format!(
                "sale window must be at least one hour (got {} minutes)",
                (end - start).num_minutes()
            )));
        }
        Ok(Self { start, end })
    }

    /// When the sale opens.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// When the sale closes.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `start <= now < end`
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Fails with the matching window error when `now` is outside the window.
    ///
    /// # Errors
    ///
    /// [`InventoryError::SaleNotStarted`] or [`InventoryError::SaleEnded`].
    pub fn ensure_open(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.start {
            return Err(InventoryError::SaleNotStarted {
                starts_at: self.start,
            });
        }
        if now >= self.end {
            return Err(InventoryError::SaleEnded { ended_at: self.end });
        }
        Ok(())
    }
}

// ============================================================================
// Ticket Type
// ============================================================================

/// Input for creating a ticket type. Signed numbers so invalid input can be
/// reported instead of silently wrapping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTicketType {
    /// Event the ticket type belongs to
    pub event_id: EventId,
    /// Display name (e.g. "VIP")
    pub name: String,
    /// Price in minor units
    pub price: i64,
    /// Total units for sale
    pub quantity: i64,
    /// Sale opens
    pub sale_start: DateTime<Utc>,
    /// Sale closes
    pub sale_end: DateTime<Utc>,
}

/// Partial update of a ticket type. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TicketTypeUpdate {
    /// New name
    pub name: Option<String>,
    /// New price in minor units
    pub price: Option<i64>,
    /// New total quantity
    pub quantity: Option<i64>,
    /// New sale start
    pub sale_start: Option<DateTime<Utc>>,
    /// New sale end
    pub sale_end: Option<DateTime<Utc>>,
}

impl TicketTypeUpdate {
    /// Checks the fields that can be checked without the stored row.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for an empty name, negative price or a
    /// quantity below one.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(price) = self.price {
            Money::try_from_signed(price)?;
        }
        if let Some(quantity) = self.quantity {
            validate_quantity(quantity)?;
        }
        Ok(())
    }
}

/// A sellable class of ticket for an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Ticket type ID
    pub id: TicketTypeId,
    /// Event ID
    pub event_id: EventId,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Total units
    pub quantity: u32,
    /// Units held or issued
    pub sold: u32,
    /// When the type can be reserved
    pub sale_window: SaleWindow,
    /// Bumped on every mutation
    pub version: u64,
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(InventoryError::Validation("name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_quantity(quantity: i64) -> Result<u32> {
    if quantity < 1 {
        return Err(InventoryError::Validation(format!(
            "quantity must be at least 1 (got {quantity})"
        )));
    }
    u32::try_from(quantity)
        .map_err(|_| InventoryError::Validation(format!("quantity {quantity} is too large")))
}

impl TicketType {
    /// Build a ticket type from validated input.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for negative price, quantity below one
    /// or an invalid sale window.
    pub fn from_new(id: TicketTypeId, input: NewTicketType) -> Result<Self> {
        validate_name(&input.name)?;
        let price = Money::try_from_signed(input.price)?;
        let quantity = validate_quantity(input.quantity)?;
        let sale_window = SaleWindow::new(input.sale_start, input.sale_end)?;

        Ok(Self {
            id,
            event_id: input.event_id,
            name: input.name,
            price,
            quantity,
            sold: 0,
            sale_window,
            version: 0,
        })
    }

    /// `quantity - sold`
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.quantity.saturating_sub(self.sold)
    }

    /// `sale_start <= now < sale_end`
    #[must_use]
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        self.sale_window.contains(now)
    }

    /// Checks whether `quantity` units can be reserved at `now`.
    ///
    /// # Errors
    ///
    /// Sale window errors first, then [`InventoryError::InsufficientStock`].
    pub fn check_reservable(&self, quantity: u32, now: DateTime<Utc>) -> Result<()> {
        self.sale_window.ensure_open(now)?;

        let available = self.available();
        if available < quantity {
            return Err(InventoryError::InsufficientStock {
                ticket_type_id: self.id,
                requested: quantity,
                available,
            });
        }
        Ok(())
    }

    /// The single rule for changing `sold`.
    ///
    /// With `expected_version` this is a compare-and-swap; without it the
    /// caller must already hold the serialization point for this row.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::VersionConflict`] when the version does not match
    /// - [`InventoryError::InsufficientStock`] when `sold` would exceed `quantity`
    /// - [`InventoryError::InventoryUnderflow`] when `sold` would go negative
    pub fn apply_delta(&mut self, delta: i64, expected_version: Option<u64>) -> Result<()> {
        if let Some(expected) = expected_version {
            if expected != self.version {
                return Err(InventoryError::VersionConflict {
                    ticket_type_id: self.id,
                    expected,
                    actual: self.version,
                });
            }
        }

        let underflow = || InventoryError::InventoryUnderflow {
            ticket_type_id: self.id,
            sold: self.sold,
            delta,
        };
        let overflow = || InventoryError::InsufficientStock {
            ticket_type_id: self.id,
            requested: u32::try_from(delta).unwrap_or(u32::MAX),
            available: self.available(),
        };

        let Some(next) = i64::from(self.sold).checked_add(delta) else {
            return Err(if delta < 0 { underflow() } else { overflow() });
        };
        if next < 0 {
            return Err(underflow());
        }
        if next > i64::from(self.quantity) {
            return Err(overflow());
        }

        self.sold = u32::try_from(next).unwrap_or(self.quantity);
        self.version += 1;
        Ok(())
    }

    /// Applies a partial update against the current row.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] for invalid fields and
    /// [`InventoryError::QuantityBelowSold`] when the new quantity would
    /// overcommit units already sold.
    pub fn apply_update(&mut self, update: &TicketTypeUpdate) -> Result<()> {
        update.validate()?;

        let quantity = match update.quantity {
            Some(quantity) => validate_quantity(quantity)?,
            None => self.quantity,
        };
        if quantity < self.sold {
            return Err(InventoryError::QuantityBelowSold {
                quantity,
                sold: self.sold,
            });
        }

        let sale_window = SaleWindow::new(
            update.sale_start.unwrap_or_else(|| self.sale_window.start()),
            update.sale_end.unwrap_or_else(|| self.sale_window.end()),
        )?;

        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(price) = update.price {
            self.price = Money::try_from_signed(price)?;
        }
        self.quantity = quantity;
        self.sale_window = sale_window;
        self.version += 1;
        Ok(())
    }

    /// Deletion is only allowed before anything was sold.
    ///
    /// # Errors
    ///
    /// [`InventoryError::TicketTypeHasSales`] when `sold > 0`.
    pub const fn ensure_deletable(&self) -> Result<()> {
        if self.sold > 0 {
            return Err(InventoryError::TicketTypeHasSales {
                ticket_type_id: self.id,
                sold: self.sold,
            });
        }
        Ok(())
    }
}

/// Availability snapshot for one ticket type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeAvailability {
    /// Ticket type ID
    pub ticket_type_id: TicketTypeId,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Total units
    pub quantity: u32,
    /// Units held or issued
    pub sold: u32,
    /// Units held by unpaid reservations
    pub held: u32,
    /// Units issued as tickets (`sold - held`)
    pub issued: u32,
    /// `quantity - sold`
    pub available: u32,
    /// Whether the sale window is open
    pub on_sale: bool,
}

// ============================================================================
// Reservation
// ============================================================================

/// Lifecycle of a reservation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Units are counted in `sold` and awaiting payment
    Held,
    /// Units were returned to the pool
    Released,
    /// Units were turned into tickets
    Consumed,
}

impl ReservationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Released => "released",
            Self::Consumed => "consumed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "held" => Ok(Self::Held),
            "released" => Ok(Self::Released),
            "consumed" => Ok(Self::Consumed),
            _ => Err(InventoryError::Storage(format!("Invalid reservation status: {s}"))),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for holding inventory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewReservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Ticket type being held
    pub ticket_type_id: TicketTypeId,
    /// User holding the units
    pub owner_id: UserId,
    /// Units held
    pub quantity: u32,
    /// When the hold becomes eligible for sweeping
    pub expires_at: DateTime<Utc>,
}

/// A persisted claim on inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Ticket type being held
    pub ticket_type_id: TicketTypeId,
    /// User holding the units
    pub owner_id: UserId,
    /// Order paying for the hold, once attached
    pub order_id: Option<OrderId>,
    /// Units held
    pub quantity: u32,
    /// Current status
    pub status: ReservationStatus,
    /// When the hold becomes eligible for sweeping
    pub expires_at: DateTime<Utc>,
    /// When the hold was made
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Create a held reservation.
    #[must_use]
    pub fn held(input: NewReservation, now: DateTime<Utc>) -> Self {
        Self {
            id: input.id,
            ticket_type_id: input.ticket_type_id,
            owner_id: input.owner_id,
            order_id: None,
            quantity: input.quantity,
            status: ReservationStatus::Held,
            expires_at: input.expires_at,
            created_at: now,
        }
    }

    /// Whether the hold has passed its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The token handed back to the caller.
    #[must_use]
    pub const fn token(&self) -> ReservationToken {
        ReservationToken {
            reservation_id: self.id,
            ticket_type_id: self.ticket_type_id,
            quantity: self.quantity,
            expires_at: self.expires_at,
        }
    }
}

/// Handle returned by a successful reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationToken {
    /// Reservation row
    pub reservation_id: ReservationId,
    /// Ticket type held
    pub ticket_type_id: TicketTypeId,
    /// Units held
    pub quantity: u32,
    /// When the hold becomes eligible for sweeping
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Order
// ============================================================================

/// Order lifecycle.
///
/// ```text
/// pending ──► completed ──► refunded
///    │
///    └──────► cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Paid, tickets issued
    Completed,
    /// Abandoned or cancelled before payment
    Cancelled,
    /// Refunded after completion
    Refunded,
}

impl OrderStatus {
    /// `pending → completed`
    #[must_use]
    pub const fn can_be_completed(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// `pending → cancelled`
    #[must_use]
    pub const fn can_be_cancelled(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// `completed → refunded`
    #[must_use]
    pub const fn can_be_refunded(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether `self → next` is on the status graph.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match next {
            Self::Completed => self.can_be_completed(),
            Self::Cancelled => self.can_be_cancelled(),
            Self::Refunded => self.can_be_refunded(),
            Self::Pending => false,
        }
    }

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(InventoryError::Storage(format!("Invalid order status: {s}"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-auditable order number, `ORD-YYYYMMDD-NNNNNN`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Build from a date and a suffix in `0..1_000_000`.
    #[must_use]
    pub fn new(date: DateTime<Utc>, suffix: u32) -> Self {
        Self(format!("ORD-{}-{:06}", date.format("%Y%m%d"), suffix % 1_000_000))
    }

    /// Parse and validate the format.
    ///
    /// # Errors
    ///
    /// [`InventoryError::Validation`] if `s` is not `ORD-` + 8 digits + `-` + 6 digits.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || InventoryError::Validation(format!("malformed order number: {s}"));
        let rest = s.strip_prefix("ORD-").ok_or_else(invalid)?;
        let (date, suffix) = rest.split_once('-').ok_or_else(invalid)?;
        let all_digits = |part: &str, len: usize| {
            part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !all_digits(date, 8) || !all_digits(suffix, 6) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// The order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Billing snapshot taken when the order is placed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    /// Billing email
    pub email: String,
    /// Billing name
    pub name: String,
}

/// Input for creating an order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewOrder {
    /// Purchasing user
    pub user_id: UserId,
    /// Event the order is for
    pub event_id: EventId,
    /// Total in minor units
    pub total_amount: Money,
    /// Billing snapshot
    pub billing: BillingDetails,
    /// Held reservations this order pays for
    pub reservation_ids: Vec<ReservationId>,
}

/// A purchase attempt and, once completed, the owner of its tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID
    pub id: OrderId,
    /// Purchasing user
    pub user_id: UserId,
    /// Event the order is for
    pub event_id: EventId,
    /// Human-auditable number
    pub order_number: OrderNumber,
    /// Total in minor units
    pub total_amount: Money,
    /// Current status
    pub status: OrderStatus,
    /// Payment reference recorded at completion
    pub payment_id: Option<String>,
    /// Billing snapshot
    pub billing: BillingDetails,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Fails unless `self.status → next` is legal.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidStateTransition`].
    pub const fn ensure_transition(&self, next: OrderStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(InventoryError::InvalidStateTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    /// Only pending orders without tickets can be deleted.
    ///
    /// # Errors
    ///
    /// [`InventoryError::OrderNotDeletable`].
    pub fn ensure_deletable(&self, ticket_count: usize) -> Result<()> {
        if self.status != OrderStatus::Pending {
            return Err(InventoryError::OrderNotDeletable {
                order_id: self.id,
                reason: format!("status is {}", self.status),
            });
        }
        if ticket_count > 0 {
            return Err(InventoryError::OrderNotDeletable {
                order_id: self.id,
                reason: format!("{ticket_count} tickets exist"),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Ticket lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Valid for entry
    Active,
    /// Scanned at the door
    Used,
    /// Order was refunded
    Refunded,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Refunded => "refunded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "refunded" => Ok(Self::Refunded),
            _ => Err(InventoryError::Storage(format!("Invalid ticket status: {s}"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque redemption key printed on the ticket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QrCode(String);

impl QrCode {
    /// Wrap a stored value.
    #[must_use]
    pub const fn from_string(value: String) -> Self {
        Self(value)
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit to mint at fulfillment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketSpec {
    /// Ticket type of the unit
    pub ticket_type_id: TicketTypeId,
}

/// A redeemable ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning order
    pub order_id: OrderId,
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Redemption key
    pub qr_code: QrCode,
    /// Current status
    pub status: TicketStatus,
    /// Minted
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// `active → used`.
    ///
    /// # Errors
    ///
    /// [`InventoryError::InvalidTicketState`] unless the ticket is active.
    pub fn redeem(&mut self) -> Result<()> {
        if self.status != TicketStatus::Active {
            return Err(InventoryError::InvalidTicketState {
                ticket_id: self.id,
                from: self.status,
                to: TicketStatus::Used,
            });
        }
        self.status = TicketStatus::Used;
        Ok(())
    }
}
