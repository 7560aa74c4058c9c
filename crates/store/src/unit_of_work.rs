use async_trait::async_trait;
use common::{
    BookId, CreditTierId, CustomerId, OrderId, PurchaseOrderId, ShortageEntryId,
    ShortageRequestId, SupplierId,
};
use domain::{
    Book, CreditTier, Customer, CustomerShortageRequest, FulfillmentEvent, InventoryRecord, Money,
    NewCustomer, NewOrder, NewPurchaseOrder, NewShipment, NewShortage, NewShortageRequest, Order,
    PurchaseOrder, PurchaseStatus, Shipment, ShortageEntry, ShortageStatus, SupplyAgreement,
};

use crate::{RecordedEvent, Result};

/// Entry point to the fulfillment tables.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a unit of work.
    ///
    /// Nothing it writes is visible to others until `commit`; dropping it
    /// without committing discards every write.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One atomic transaction over the fulfillment tables.
///
/// Reads see the unit's own writes. `lock_*` reads additionally hold the row
/// until the unit ends, so read-check-write sequences on the same row cannot
/// interleave across units.
#[async_trait]
pub trait UnitOfWork: Send {
    // Credit directory

    async fn list_credit_tiers(&mut self) -> Result<Vec<CreditTier>>;

    async fn upsert_credit_tier(&mut self, tier: &CreditTier) -> Result<()>;

    async fn insert_customer(&mut self, customer: NewCustomer) -> Result<Customer>;

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>>;

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>>;

    /// Takes `amount` off the balance and adds it to cumulative spend in one
    /// statement. Returns the updated customer.
    async fn debit_customer(&mut self, id: CustomerId, amount: Money) -> Result<Customer>;

    async fn set_customer_tier(&mut self, id: CustomerId, tier: CreditTierId) -> Result<()>;

    // Catalog and inventory

    async fn upsert_book(&mut self, book: &Book) -> Result<()>;

    async fn get_book(&mut self, id: &BookId) -> Result<Option<Book>>;

    async fn upsert_inventory(&mut self, record: &InventoryRecord) -> Result<()>;

    async fn get_inventory(&mut self, book_id: &BookId) -> Result<Option<InventoryRecord>>;

    /// Adds `delta` units, creating the record when the book has none.
    async fn increase_inventory(&mut self, book_id: &BookId, delta: u32)
    -> Result<InventoryRecord>;

    /// Removes `delta` units only if at least that many are on hand.
    ///
    /// Returns `None` when nothing was changed.
    async fn decrease_inventory(
        &mut self,
        book_id: &BookId,
        delta: u32,
    ) -> Result<Option<InventoryRecord>>;

    // Shortage backlog

    /// Inserts a PENDING entry for the book or merges into the existing one.
    async fn upsert_pending_shortage(&mut self, raise: &NewShortage) -> Result<ShortageEntry>;

    async fn get_shortage(&mut self, id: ShortageEntryId) -> Result<Option<ShortageEntry>>;

    async fn find_shortage(
        &mut self,
        book_id: &BookId,
        status: ShortageStatus,
    ) -> Result<Option<ShortageEntry>>;

    /// Ordered by priority (highest first), then record date, then id.
    async fn list_shortages(&mut self, status: Option<ShortageStatus>)
    -> Result<Vec<ShortageEntry>>;

    /// Writes quantity, status and priority. Fails with `UniqueViolation`
    /// when the book already has another entry in the target status.
    async fn update_shortage(&mut self, entry: &ShortageEntry) -> Result<()>;

    async fn delete_shortage(&mut self, id: ShortageEntryId) -> Result<()>;

    /// Points purchase lines and customer requests at `to` instead of `from`.
    async fn redirect_shortage_references(
        &mut self,
        from: ShortageEntryId,
        to: ShortageEntryId,
    ) -> Result<u64>;

    // Customer shortage requests

    async fn insert_shortage_request(
        &mut self,
        request: NewShortageRequest,
    ) -> Result<CustomerShortageRequest>;

    async fn get_shortage_request(
        &mut self,
        id: ShortageRequestId,
    ) -> Result<Option<CustomerShortageRequest>>;

    async fn list_requests_for_order(
        &mut self,
        order_id: OrderId,
    ) -> Result<Vec<CustomerShortageRequest>>;

    async fn list_pending_requests(&mut self) -> Result<Vec<CustomerShortageRequest>>;

    async fn update_shortage_request(&mut self, request: &CustomerShortageRequest) -> Result<()>;

    // Orders and shipments

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Writes status, timestamps and line counters.
    ///
    /// Refuses a status the stored one cannot move to.
    async fn save_order(&mut self, order: &Order) -> Result<()>;

    async fn insert_shipment(&mut self, shipment: NewShipment) -> Result<Shipment>;

    /// Shipments of an order in creation order.
    async fn list_shipments(&mut self, order_id: OrderId) -> Result<Vec<Shipment>>;

    async fn save_shipment(&mut self, shipment: &Shipment) -> Result<()>;

    // Procurement

    async fn upsert_supply_agreement(&mut self, agreement: &SupplyAgreement) -> Result<()>;

    async fn list_supply_agreements(
        &mut self,
        supplier_id: SupplierId,
        book_id: &BookId,
    ) -> Result<Vec<SupplyAgreement>>;

    async fn insert_purchase_order(&mut self, order: NewPurchaseOrder) -> Result<PurchaseOrder>;

    async fn get_purchase_order(&mut self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>>;

    async fn lock_purchase_order(&mut self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>>;

    async fn set_purchase_status(&mut self, id: PurchaseOrderId, status: PurchaseStatus)
    -> Result<()>;

    // Outbox

    async fn record_event(&mut self, event: &FulfillmentEvent) -> Result<()>;

    async fn list_events(&mut self, order_id: OrderId) -> Result<Vec<RecordedEvent>>;

    /// Makes every write of this unit durable and visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}
