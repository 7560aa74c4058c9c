use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    BookId, CreditTierId, CustomerId, OrderId, OrderLineId, PurchaseLineId, PurchaseOrderId,
    ShipmentId, ShipmentLineId, ShortageEntryId, ShortageRequestId, SupplierId,
};
use domain::{
    Book, CreditTier, Customer, CustomerShortageRequest, FulfillmentEvent, InventoryRecord, Money,
    NewCustomer, NewOrder, NewPurchaseOrder, NewShipment, NewShortage, NewShortageRequest, Order,
    OrderError, PurchaseOrder, PurchaseStatus, ReceiveStatus, RequestStatus, Shipment, ShipmentLine,
    ShipmentStatus, ShortageEntry, ShortageStatus, SupplyAgreement,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{RecordedEvent, Result, Store, StoreError, UnitOfWork};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    tiers: BTreeMap<CreditTierId, CreditTier>,
    customers: BTreeMap<CustomerId, Customer>,
    books: BTreeMap<BookId, Book>,
    inventory: BTreeMap<BookId, InventoryRecord>,
    shortages: BTreeMap<ShortageEntryId, ShortageEntry>,
    requests: BTreeMap<ShortageRequestId, CustomerShortageRequest>,
    orders: BTreeMap<OrderId, Order>,
    shipments: BTreeMap<ShipmentId, Shipment>,
    agreements: Vec<SupplyAgreement>,
    purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    events: Vec<RecordedEvent>,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Same rule as the `(book_id, status)` unique index.
    fn check_shortage_unique(&self, entry: &ShortageEntry) -> Result<()> {
        let clash = self.shortages.values().any(|other| {
            other.id != entry.id && other.book_id == entry.book_id && other.status == entry.status
        });
        if clash {
            return Err(StoreError::UniqueViolation {
                constraint: "uq_shortage_book_status".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory store for tests and for running without a database.
///
/// A unit of work holds the only lock on the tables and edits a private copy,
/// so units run one after another and rollback is dropping the copy.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed outbox events.
    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork { guard, work }))
    }
}

struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::RowNotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn list_credit_tiers(&mut self) -> Result<Vec<CreditTier>> {
        Ok(self.work.tiers.values().cloned().collect())
    }

    async fn upsert_credit_tier(&mut self, tier: &CreditTier) -> Result<()> {
        self.work.tiers.insert(tier.id, tier.clone());
        Ok(())
    }

    async fn insert_customer(&mut self, customer: NewCustomer) -> Result<Customer> {
        let id = CustomerId::new(self.work.allocate());
        let customer = customer.into_customer(id);
        self.work.customers.insert(id, customer.clone());
        Ok(customer)
    }

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.work.customers.get(&id).cloned())
    }

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        self.get_customer(id).await
    }

    async fn debit_customer(&mut self, id: CustomerId, amount: Money) -> Result<Customer> {
        let customer = self
            .work
            .customers
            .get_mut(&id)
            .ok_or_else(|| not_found("customer", id))?;
        customer.balance -= amount;
        customer.cumulative_spend += amount;
        Ok(customer.clone())
    }

    async fn set_customer_tier(&mut self, id: CustomerId, tier: CreditTierId) -> Result<()> {
        let customer = self
            .work
            .customers
            .get_mut(&id)
            .ok_or_else(|| not_found("customer", id))?;
        customer.credit_tier_id = tier;
        Ok(())
    }

    async fn upsert_book(&mut self, book: &Book) -> Result<()> {
        self.work.books.insert(book.id.clone(), book.clone());
        Ok(())
    }

    async fn get_book(&mut self, id: &BookId) -> Result<Option<Book>> {
        Ok(self.work.books.get(id).cloned())
    }

    async fn upsert_inventory(&mut self, record: &InventoryRecord) -> Result<()> {
        self.work
            .inventory
            .insert(record.book_id.clone(), record.clone());
        Ok(())
    }

    async fn get_inventory(&mut self, book_id: &BookId) -> Result<Option<InventoryRecord>> {
        Ok(self.work.inventory.get(book_id).cloned())
    }

    async fn increase_inventory(
        &mut self,
        book_id: &BookId,
        delta: u32,
    ) -> Result<InventoryRecord> {
        let record = self
            .work
            .inventory
            .entry(book_id.clone())
            .or_insert_with(|| InventoryRecord::empty(book_id.clone()));
        let current = record.quantity;
        record.quantity = current
            .checked_add(delta)
            .ok_or_else(|| OrderError::QuantityOverflow {
                book_id: book_id.clone(),
                current,
                added: delta,
            })?;
        Ok(record.clone())
    }

    async fn decrease_inventory(
        &mut self,
        book_id: &BookId,
        delta: u32,
    ) -> Result<Option<InventoryRecord>> {
        match self.work.inventory.get_mut(book_id) {
            Some(record) if record.quantity >= delta => {
                record.quantity -= delta;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert_pending_shortage(&mut self, raise: &NewShortage) -> Result<ShortageEntry> {
        let existing = self
            .work
            .shortages
            .values_mut()
            .find(|e| e.book_id == raise.book_id && e.status == ShortageStatus::Pending);
        if let Some(entry) = existing {
            entry.merge(raise)?;
            return Ok(entry.clone());
        }

        let id = ShortageEntryId::new(self.work.allocate());
        let entry = raise.clone().into_entry(id);
        self.work.shortages.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_shortage(&mut self, id: ShortageEntryId) -> Result<Option<ShortageEntry>> {
        Ok(self.work.shortages.get(&id).cloned())
    }

    async fn find_shortage(
        &mut self,
        book_id: &BookId,
        status: ShortageStatus,
    ) -> Result<Option<ShortageEntry>> {
        Ok(self
            .work
            .shortages
            .values()
            .find(|e| &e.book_id == book_id && e.status == status)
            .cloned())
    }

    async fn list_shortages(
        &mut self,
        status: Option<ShortageStatus>,
    ) -> Result<Vec<ShortageEntry>> {
        let mut entries: Vec<_> = self
            .work
            .shortages
            .values()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.record_date.cmp(&b.record_date))
                .then(a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    async fn update_shortage(&mut self, entry: &ShortageEntry) -> Result<()> {
        if !self.work.shortages.contains_key(&entry.id) {
            return Err(not_found("shortage entry", entry.id));
        }
        self.work.check_shortage_unique(entry)?;
        self.work.shortages.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete_shortage(&mut self, id: ShortageEntryId) -> Result<()> {
        self.work.shortages.remove(&id);
        Ok(())
    }

    async fn redirect_shortage_references(
        &mut self,
        from: ShortageEntryId,
        to: ShortageEntryId,
    ) -> Result<u64> {
        let mut moved = 0;
        for line in self
            .work
            .purchase_orders
            .values_mut()
            .flat_map(|po| po.lines.iter_mut())
            .filter(|l| l.related_entry_id == Some(from))
        {
            line.related_entry_id = Some(to);
            moved += 1;
        }
        for request in self
            .work
            .requests
            .values_mut()
            .filter(|r| r.related_entry_id == Some(from))
        {
            request.related_entry_id = Some(to);
            moved += 1;
        }
        Ok(moved)
    }

    async fn insert_shortage_request(
        &mut self,
        request: NewShortageRequest,
    ) -> Result<CustomerShortageRequest> {
        let id = ShortageRequestId::new(self.work.allocate());
        let request = request.into_request(id);
        self.work.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn get_shortage_request(
        &mut self,
        id: ShortageRequestId,
    ) -> Result<Option<CustomerShortageRequest>> {
        Ok(self.work.requests.get(&id).cloned())
    }

    async fn list_requests_for_order(
        &mut self,
        order_id: OrderId,
    ) -> Result<Vec<CustomerShortageRequest>> {
        Ok(self
            .work
            .requests
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_pending_requests(&mut self) -> Result<Vec<CustomerShortageRequest>> {
        Ok(self
            .work
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_shortage_request(&mut self, request: &CustomerShortageRequest) -> Result<()> {
        let stored = self
            .work
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| not_found("shortage request", request.id))?;
        *stored = request.clone();
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let id = OrderId::new(self.work.allocate());
        let line_ids: Vec<_> = order
            .lines
            .iter()
            .map(|_| OrderLineId::new(self.work.allocate()))
            .collect();
        let order = order.into_order(id, &line_ids);
        self.work.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.get_order(id).await
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        let stored = self
            .work
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| not_found("order", order.id))?;
        if !stored.status.can_become(order.status) {
            return Err(StoreError::IllegalStatusChange {
                order_id: order.id,
                from: stored.status,
                to: order.status,
            });
        }
        *stored = order.clone();
        Ok(())
    }

    async fn insert_shipment(&mut self, shipment: NewShipment) -> Result<Shipment> {
        let id = ShipmentId::new(self.work.allocate());
        let mut lines = Vec::with_capacity(shipment.lines.len());
        for (order_line_id, quantity) in shipment.lines {
            lines.push(ShipmentLine {
                id: ShipmentLineId::new(self.work.allocate()),
                shipment_id: id,
                order_line_id,
                ship_quantity: quantity,
                receive_status: ReceiveStatus::Pending,
                received_quantity: 0,
                received_time: None,
            });
        }
        let shipment = Shipment {
            id,
            order_id: shipment.order_id,
            ship_time: shipment.ship_time,
            carrier: shipment.carrier,
            tracking_number: shipment.tracking_number,
            status: ShipmentStatus::Shipped,
            operator: shipment.operator,
            lines,
        };
        self.work.shipments.insert(id, shipment.clone());
        Ok(shipment)
    }

    async fn list_shipments(&mut self, order_id: OrderId) -> Result<Vec<Shipment>> {
        Ok(self
            .work
            .shipments
            .values()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn save_shipment(&mut self, shipment: &Shipment) -> Result<()> {
        let stored = self
            .work
            .shipments
            .get_mut(&shipment.id)
            .ok_or_else(|| not_found("shipment", shipment.id))?;
        *stored = shipment.clone();
        Ok(())
    }

    async fn upsert_supply_agreement(&mut self, agreement: &SupplyAgreement) -> Result<()> {
        self.work.agreements.retain(|a| {
            !(a.supplier_id == agreement.supplier_id
                && a.book_id == agreement.book_id
                && a.primary == agreement.primary)
        });
        self.work.agreements.push(agreement.clone());
        Ok(())
    }

    async fn list_supply_agreements(
        &mut self,
        supplier_id: SupplierId,
        book_id: &BookId,
    ) -> Result<Vec<SupplyAgreement>> {
        Ok(self
            .work
            .agreements
            .iter()
            .filter(|a| a.supplier_id == supplier_id && &a.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn insert_purchase_order(&mut self, order: NewPurchaseOrder) -> Result<PurchaseOrder> {
        let id = PurchaseOrderId::new(self.work.allocate());
        let line_ids: Vec<_> = order
            .lines
            .iter()
            .map(|_| PurchaseLineId::new(self.work.allocate()))
            .collect();
        let order = order.into_purchase_order(id, &line_ids);
        self.work.purchase_orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get_purchase_order(&mut self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>> {
        Ok(self.work.purchase_orders.get(&id).cloned())
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>> {
        self.get_purchase_order(id).await
    }

    async fn set_purchase_status(
        &mut self,
        id: PurchaseOrderId,
        status: PurchaseStatus,
    ) -> Result<()> {
        let order = self
            .work
            .purchase_orders
            .get_mut(&id)
            .ok_or_else(|| not_found("purchase order", id))?;
        order.status = status;
        Ok(())
    }

    async fn record_event(&mut self, event: &FulfillmentEvent) -> Result<()> {
        let sequence = self.work.events.len() as i64 + 1;
        self.work.events.push(RecordedEvent {
            sequence,
            order_id: event.order_id(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_events(&mut self, order_id: OrderId) -> Result<Vec<RecordedEvent>> {
        Ok(self
            .work
            .events
            .iter()
            .filter(|e| e.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUnitOfWork { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use domain::{CustomerStatus, ShortageSource};

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn raise(book: &str, qty: u32) -> NewShortage {
        NewShortage::new(BookId::new(book), qty, ShortageSource::Manual, today())
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = InMemoryStore::new();

        let mut uow = store.begin().await.unwrap();
        uow.increase_inventory(&BookId::new("X"), 5).await.unwrap();
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert!(uow.get_inventory(&BookId::new("X")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryStore::new();

        let mut uow = store.begin().await.unwrap();
        uow.increase_inventory(&BookId::new("X"), 5).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let record = uow.get_inventory(&BookId::new("X")).await.unwrap().unwrap();
        assert_eq!(record.quantity, 5);
    }

    #[tokio::test]
    async fn test_conditional_decrease() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let book = BookId::new("X");
        uow.increase_inventory(&book, 10).await.unwrap();

        assert_eq!(uow.decrease_inventory(&book, 6).await.unwrap().unwrap().quantity, 4);
        assert!(uow.decrease_inventory(&book, 6).await.unwrap().is_none());
        assert!(uow.decrease_inventory(&BookId::new("missing"), 1).await.unwrap().is_none());
        assert_eq!(uow.get_inventory(&book).await.unwrap().unwrap().quantity, 4);
    }

    #[tokio::test]
    async fn test_pending_shortage_merges_per_book() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let first = uow.upsert_pending_shortage(&raise("X", 3)).await.unwrap();
        let second = uow.upsert_pending_shortage(&raise("X", 4)).await.unwrap();
        let other = uow.upsert_pending_shortage(&raise("Y", 1)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(second.required_quantity, 7);
        assert_eq!(
            uow.list_shortages(Some(ShortageStatus::Pending)).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_quantity_overflow_leaves_rows_unchanged() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let book = BookId::new("X");
        uow.increase_inventory(&book, u32::MAX).await.unwrap();
        uow.upsert_pending_shortage(&raise("X", u32::MAX)).await.unwrap();

        assert!(matches!(
            uow.increase_inventory(&book, 1).await,
            Err(StoreError::Quantity(OrderError::QuantityOverflow {
                current: u32::MAX,
                added: 1,
                ..
            }))
        ));
        assert!(matches!(
            uow.upsert_pending_shortage(&raise("X", 2)).await,
            Err(StoreError::Quantity(OrderError::QuantityOverflow { .. }))
        ));
        assert_eq!(uow.get_inventory(&book).await.unwrap().unwrap().quantity, u32::MAX);
        let pending = uow.list_shortages(Some(ShortageStatus::Pending)).await.unwrap();
        assert_eq!(pending[0].required_quantity, u32::MAX);
    }

    #[tokio::test]
    async fn test_update_shortage_enforces_book_status_uniqueness() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let mut a = uow.upsert_pending_shortage(&raise("X", 3)).await.unwrap();
        a.status = ShortageStatus::Completed;
        uow.update_shortage(&a).await.unwrap();

        let mut b = uow.upsert_pending_shortage(&raise("X", 2)).await.unwrap();
        assert_ne!(a.id, b.id);
        b.status = ShortageStatus::Completed;
        assert!(matches!(
            uow.update_shortage(&b).await,
            Err(StoreError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_shortages_listed_by_priority_then_date() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();

        let low = uow.upsert_pending_shortage(&raise("A", 1)).await.unwrap();
        let high = uow
            .upsert_pending_shortage(&raise("B", 1).with_priority(5))
            .await
            .unwrap();

        let listed = uow.list_shortages(None).await.unwrap();
        assert_eq!(listed[0].id, high.id);
        assert_eq!(listed[1].id, low.id);
    }

    #[tokio::test]
    async fn test_debit_customer_is_relative() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let customer = uow
            .insert_customer(NewCustomer {
                name: "Ada".to_string(),
                balance: Money::from_units(100),
                cumulative_spend: Money::zero(),
                credit_tier_id: CreditTierId::new(1),
                status: CustomerStatus::Active,
            })
            .await
            .unwrap();

        let after = uow
            .debit_customer(customer.id, Money::from_units(30))
            .await
            .unwrap();
        assert_eq!(after.balance, Money::from_units(70));
        assert_eq!(after.cumulative_spend, Money::from_units(30));
    }

    #[tokio::test]
    async fn test_record_event_assigns_order() {
        let store = InMemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let order_id = OrderId::new(9);
        uow.record_event(&FulfillmentEvent::OrderCompleted { order_id })
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.event_count().await, 1);
        let mut uow = store.begin().await.unwrap();
        let events = uow.list_events(order_id).await.unwrap();
        assert_eq!(events[0].event_type, "OrderCompleted");
        assert_eq!(events[0].sequence, 1);
    }
}
