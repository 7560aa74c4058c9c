//! Shortage backlog entries and customer shortage requests.

use chrono::{DateTime, NaiveDate, Utc};
use common::{BookId, CustomerId, OrderId, OrderLineId, ShortageEntryId, ShortageRequestId};
use serde::{Deserialize, Serialize};

use crate::order::OrderError;

/// Priority of a raise unless an administrator picks another.
pub const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShortageSource {
    Manual,
    LowStock,
    CustomerRequest,
    OrderExceed,
}

impl ShortageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortageSource::Manual => "MANUAL",
            ShortageSource::LowStock => "LOW_STOCK",
            ShortageSource::CustomerRequest => "CUSTOMER_REQUEST",
            ShortageSource::OrderExceed => "ORDER_EXCEED",
        }
    }
}

impl std::str::FromStr for ShortageSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(ShortageSource::Manual),
            "LOW_STOCK" => Ok(ShortageSource::LowStock),
            "CUSTOMER_REQUEST" => Ok(ShortageSource::CustomerRequest),
            "ORDER_EXCEED" => Ok(ShortageSource::OrderExceed),
            other => Err(format!("unknown shortage source: {other}")),
        }
    }
}

/// At most one entry exists per `(book_id, status)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShortageStatus {
    Pending,
    Purchasing,
    Completed,
}

impl ShortageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortageStatus::Pending => "PENDING",
            ShortageStatus::Purchasing => "PURCHASING",
            ShortageStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for ShortageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ShortageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ShortageStatus::Pending),
            "PURCHASING" => Ok(ShortageStatus::Purchasing),
            "COMPLETED" => Ok(ShortageStatus::Completed),
            other => Err(format!("unknown shortage status: {other}")),
        }
    }
}

/// A deduplicated replenishment need for one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortageEntry {
    pub id: ShortageEntryId,
    pub book_id: BookId,
    pub required_quantity: u32,
    pub record_date: NaiveDate,
    pub source: ShortageSource,
    pub related_customer_id: Option<CustomerId>,
    pub status: ShortageStatus,
    pub priority: i32,
}

impl ShortageEntry {
    /// Folds another raise for the same book into this entry.
    ///
    /// Quantity accumulates; date and source follow the latest raise. An
    /// existing customer or priority is kept when the new raise has none.
    ///
    /// Fails without touching the entry when the quantity would leave `u32`.
    pub fn merge(&mut self, raise: &NewShortage) -> Result<(), OrderError> {
        self.required_quantity = self.add_quantity(raise.quantity)?;
        self.record_date = raise.record_date;
        self.source = raise.source;
        if raise.related_customer_id.is_some() {
            self.related_customer_id = raise.related_customer_id;
        }
        if let Some(priority) = raise.priority {
            self.priority = priority;
        }
        Ok(())
    }

    /// Folds another entry of the same book into this one, keeping the
    /// higher priority.
    pub fn absorb(&mut self, other: &ShortageEntry) -> Result<(), OrderError> {
        self.required_quantity = self.add_quantity(other.required_quantity)?;
        self.priority = self.priority.max(other.priority);
        Ok(())
    }

    fn add_quantity(&self, added: u32) -> Result<u32, OrderError> {
        self.required_quantity
            .checked_add(added)
            .ok_or_else(|| OrderError::QuantityOverflow {
                book_id: self.book_id.clone(),
                current: self.required_quantity,
                added,
            })
    }
}

/// A request to raise (or grow) the PENDING entry of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShortage {
    pub book_id: BookId,
    pub quantity: u32,
    pub source: ShortageSource,
    pub related_customer_id: Option<CustomerId>,
    pub priority: Option<i32>,
    pub record_date: NaiveDate,
}

impl NewShortage {
    pub fn new(book_id: BookId, quantity: u32, source: ShortageSource, today: NaiveDate) -> Self {
        Self {
            book_id,
            quantity,
            source,
            related_customer_id: None,
            priority: None,
            record_date: today,
        }
    }

    /// A customer's shortage taken into the backlog.
    pub fn customer_request(
        book_id: BookId,
        quantity: u32,
        customer_id: CustomerId,
        today: NaiveDate,
    ) -> Self {
        Self::new(book_id, quantity, ShortageSource::CustomerRequest, today)
            .for_customer(customer_id)
            .with_priority(DEFAULT_PRIORITY)
    }

    /// Stock fell `gap` units under the safety level.
    pub fn low_stock(book_id: BookId, gap: u32, today: NaiveDate) -> Self {
        Self::new(book_id, gap, ShortageSource::LowStock, today).with_priority(DEFAULT_PRIORITY)
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.related_customer_id = Some(customer_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Entry created when no PENDING entry exists yet.
    pub fn into_entry(self, id: ShortageEntryId) -> ShortageEntry {
        ShortageEntry {
            id,
            book_id: self.book_id,
            required_quantity: self.quantity,
            record_date: self.record_date,
            source: self.source,
            related_customer_id: self.related_customer_id,
            status: ShortageStatus::Pending,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Accepted => "ACCEPTED",
            RequestStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "ACCEPTED" => Ok(RequestStatus::Accepted),
            "REJECTED" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// A customer-visible record of a shortage on one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerShortageRequest {
    pub id: ShortageRequestId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub book_id: BookId,
    pub requested_qty: u32,
    pub customer_note: Option<String>,
    pub paid: bool,
    pub status: RequestStatus,
    pub related_entry_id: Option<ShortageEntryId>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl CustomerShortageRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn accept(&mut self, entry_id: ShortageEntryId, at: DateTime<Utc>) {
        self.status = RequestStatus::Accepted;
        self.related_entry_id = Some(entry_id);
        self.processed_at = Some(at);
    }

    pub fn reject(&mut self, at: DateTime<Utc>) {
        self.status = RequestStatus::Rejected;
        self.processed_at = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShortageRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub book_id: BookId,
    pub requested_qty: u32,
    pub customer_note: Option<String>,
    pub paid: bool,
    pub status: RequestStatus,
    pub related_entry_id: Option<ShortageEntryId>,
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl NewShortageRequest {
    pub fn into_request(self, id: ShortageRequestId) -> CustomerShortageRequest {
        let processed_at = (self.status != RequestStatus::Pending).then_some(self.created_at);
        CustomerShortageRequest {
            id,
            order_id: self.order_id,
            customer_id: self.customer_id,
            book_id: self.book_id,
            requested_qty: self.requested_qty,
            customer_note: self.customer_note,
            paid: self.paid,
            status: self.status,
            related_entry_id: self.related_entry_id,
            notified: self.notified,
            created_at: self.created_at,
            processed_at,
        }
    }
}

/// The customer's answer when an order line cannot be covered from stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortageDecision {
    /// Pay now and have the shortage registered straight away.
    PayAndRegister,
    /// Only register; wait for an administrator before paying.
    RegisterOnly,
}

/// A line whose remaining quantity exceeds the stock on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineShortage {
    pub order_line_id: OrderLineId,
    pub book_id: BookId,
    pub required: u32,
    pub on_hand: u32,
}
