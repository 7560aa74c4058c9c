use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use common::{
    BookId, CreditTierId, CustomerId, OrderId, OrderLineId, PurchaseLineId, PurchaseOrderId,
    ShipmentId, ShipmentLineId, ShortageEntryId, ShortageRequestId, SupplierId,
};
use domain::{
    Book, CreditTier, Customer, CustomerShortageRequest, DiscountRate, FulfillmentEvent,
    InventoryRecord, Money, NewCustomer, NewOrder, NewPurchaseOrder, NewShipment, NewShortage,
    NewShortageRequest, Order, OrderError, OrderLine, OverdraftPolicy, PurchaseLine, PurchaseOrder,
    PurchaseStatus, Shipment, ShipmentLine, ShortageEntry, ShortageStatus, SupplyAgreement,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use crate::{RecordedEvent, Result, Store, StoreError, UnitOfWork};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        tracing::debug!("unit of work opened");
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn quantity(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw)
        .map_err(|_| StoreError::InvalidData(format!("{column} out of range: {raw}")))
}

/// Rejects a sum written by an in-place `+` that left the `u32` range.
/// The caller drops the unit of work, which rolls the write back.
fn accumulated(row: &PgRow, column: &str, book_id: &BookId, added: u32) -> Result<()> {
    let raw: i64 = row.try_get(column)?;
    if raw > i64::from(u32::MAX) {
        return Err(StoreError::Quantity(OrderError::QuantityOverflow {
            book_id: book_id.clone(),
            current: u32::try_from(raw - i64::from(added)).unwrap_or(u32::MAX),
            added,
        }));
    }
    Ok(())
}

fn money(row: &PgRow, column: &str) -> Result<Money> {
    Ok(Money::from_cents(row.try_get(column)?))
}

fn parsed<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(StoreError::InvalidData)
}

fn discount(row: &PgRow, column: &str) -> Result<DiscountRate> {
    let raw: i32 = row.try_get(column)?;
    u32::try_from(raw)
        .ok()
        .and_then(DiscountRate::from_basis_points)
        .ok_or_else(|| StoreError::InvalidData(format!("{column} out of range: {raw}")))
}

fn basis_points(rate: DiscountRate) -> i32 {
    // at most 10_000
    rate.basis_points() as i32
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::RowNotFound {
        entity,
        id: id.to_string(),
    }
}

fn map_unique(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && let Some(constraint) = db_err.constraint()
        && db_err.is_unique_violation()
    {
        tracing::warn!(constraint, "unique constraint violated");
        return StoreError::UniqueViolation {
            constraint: constraint.to_string(),
        };
    }
    StoreError::Database(err)
}

fn row_to_tier(row: &PgRow) -> Result<CreditTier> {
    let kind: String = row.try_get("overdraft_kind")?;
    let limit: Option<i64> = row.try_get("overdraft_limit")?;
    let overdraft = match (kind.as_str(), limit) {
        ("NOT_ALLOWED", _) => OverdraftPolicy::NotAllowed,
        ("LIMITED", Some(cents)) => OverdraftPolicy::Limited(Money::from_cents(cents)),
        ("UNLIMITED", _) => OverdraftPolicy::Unlimited,
        (other, _) => {
            return Err(StoreError::InvalidData(format!(
                "overdraft kind {other} with limit {limit:?}"
            )));
        }
    };
    Ok(CreditTier {
        id: CreditTierId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        discount_rate: discount(row, "discount_bp")?,
        overdraft,
        upgrade_threshold: money(row, "upgrade_threshold")?,
    })
}

fn row_to_customer(row: &PgRow) -> Result<Customer> {
    Ok(Customer {
        id: CustomerId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        balance: money(row, "balance")?,
        cumulative_spend: money(row, "cumulative_spend")?,
        credit_tier_id: CreditTierId::new(row.try_get("credit_tier_id")?),
        status: parsed(row, "status")?,
    })
}

fn row_to_inventory(row: &PgRow) -> Result<InventoryRecord> {
    Ok(InventoryRecord {
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        quantity: quantity(row, "quantity")?,
        safety_stock: quantity(row, "safety_stock")?,
        location_code: row.try_get("location_code")?,
    })
}

fn row_to_shortage(row: &PgRow) -> Result<ShortageEntry> {
    Ok(ShortageEntry {
        id: ShortageEntryId::new(row.try_get("id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        required_quantity: quantity(row, "required_quantity")?,
        record_date: row.try_get("record_date")?,
        source: parsed(row, "source")?,
        related_customer_id: row
            .try_get::<Option<i64>, _>("related_customer_id")?
            .map(CustomerId::new),
        status: parsed(row, "status")?,
        priority: row.try_get("priority")?,
    })
}

fn row_to_request(row: &PgRow) -> Result<CustomerShortageRequest> {
    Ok(CustomerShortageRequest {
        id: ShortageRequestId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        customer_id: CustomerId::new(row.try_get("customer_id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        requested_qty: quantity(row, "requested_qty")?,
        customer_note: row.try_get("customer_note")?,
        paid: row.try_get("paid")?,
        status: parsed(row, "processed_status")?,
        related_entry_id: row
            .try_get::<Option<i64>, _>("related_entry_id")?
            .map(ShortageEntryId::new),
        notified: row.try_get("notified")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_order_line(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        id: OrderLineId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        quantity: quantity(row, "quantity")?,
        shipped_quantity: quantity(row, "shipped_quantity")?,
        received_quantity: quantity(row, "received_quantity")?,
        unit_price: money(row, "unit_price")?,
        sub_amount: money(row, "sub_amount")?,
        status: parsed(row, "line_status")?,
    })
}

fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        customer_id: CustomerId::new(row.try_get("customer_id")?),
        status: parsed(row, "status")?,
        goods_amount: money(row, "goods_amount")?,
        discount_rate: discount(row, "discount_bp")?,
        payable_amount: money(row, "payable_amount")?,
        shipping_address: row.try_get("shipping_address")?,
        customer_note: row.try_get("customer_note")?,
        order_time: row.try_get("order_time")?,
        payment_time: row.try_get("payment_time")?,
        delivery_time: row.try_get("delivery_time")?,
        lines,
    })
}

fn row_to_shipment_line(row: &PgRow) -> Result<ShipmentLine> {
    Ok(ShipmentLine {
        id: ShipmentLineId::new(row.try_get("id")?),
        shipment_id: ShipmentId::new(row.try_get("shipment_id")?),
        order_line_id: OrderLineId::new(row.try_get("order_line_id")?),
        ship_quantity: quantity(row, "ship_quantity")?,
        receive_status: parsed(row, "receive_status")?,
        received_quantity: quantity(row, "received_quantity")?,
        received_time: row.try_get("received_time")?,
    })
}

fn row_to_purchase_line(row: &PgRow) -> Result<PurchaseLine> {
    Ok(PurchaseLine {
        id: PurchaseLineId::new(row.try_get("id")?),
        purchase_order_id: PurchaseOrderId::new(row.try_get("purchase_order_id")?),
        book_id: BookId::new(row.try_get::<String, _>("book_id")?),
        quantity: quantity(row, "quantity")?,
        unit_price: money(row, "unit_price")?,
        related_entry_id: row
            .try_get::<Option<i64>, _>("related_entry_id")?
            .map(ShortageEntryId::new),
    })
}

fn row_to_event(row: &PgRow) -> Result<RecordedEvent> {
    Ok(RecordedEvent {
        sequence: row.try_get("sequence")?,
        order_id: row.try_get::<Option<i64>, _>("order_id")?.map(OrderId::new),
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

impl PgUnitOfWork {
    async fn load_order(&mut self, id: OrderId, for_update: bool) -> Result<Option<Order>> {
        let sql = if for_update {
            "SELECT * FROM sales_order WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM sales_order WHERE id = $1"
        };
        let Some(header) = sqlx::query(sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query("SELECT * FROM order_line WHERE order_id = $1 ORDER BY id")
            .bind(id.get())
            .fetch_all(&mut *self.tx)
            .await?;
        let lines = rows
            .iter()
            .map(row_to_order_line)
            .collect::<Result<Vec<_>>>()?;

        row_to_order(&header, lines).map(Some)
    }

    async fn load_purchase_order(
        &mut self,
        id: PurchaseOrderId,
        for_update: bool,
    ) -> Result<Option<PurchaseOrder>> {
        let sql = if for_update {
            "SELECT * FROM purchase_order WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM purchase_order WHERE id = $1"
        };
        let Some(header) = sqlx::query(sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?
        else {
            return Ok(None);
        };

        let rows =
            sqlx::query("SELECT * FROM purchase_line WHERE purchase_order_id = $1 ORDER BY id")
                .bind(id.get())
                .fetch_all(&mut *self.tx)
                .await?;
        let lines = rows
            .iter()
            .map(row_to_purchase_line)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(PurchaseOrder {
            id,
            supplier_id: SupplierId::new(header.try_get("supplier_id")?),
            create_date: header.try_get("create_date")?,
            expected_date: header.try_get("expected_date")?,
            buyer: header.try_get("buyer")?,
            estimated_amount: money(&header, "estimated_amount")?,
            status: parsed(&header, "status")?,
            lines,
        }))
    }

    async fn load_customer(&mut self, id: CustomerId, for_update: bool) -> Result<Option<Customer>> {
        let sql = if for_update {
            "SELECT * FROM customer WHERE id = $1 FOR UPDATE"
        } else {
            "SELECT * FROM customer WHERE id = $1"
        };
        sqlx::query(sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_customer)
            .transpose()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn list_credit_tiers(&mut self) -> Result<Vec<CreditTier>> {
        let rows = sqlx::query("SELECT * FROM credit_tier ORDER BY upgrade_threshold, id")
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(row_to_tier).collect()
    }

    async fn upsert_credit_tier(&mut self, tier: &CreditTier) -> Result<()> {
        let (kind, limit) = match tier.overdraft {
            OverdraftPolicy::NotAllowed => ("NOT_ALLOWED", None),
            OverdraftPolicy::Limited(limit) => ("LIMITED", Some(limit.cents())),
            OverdraftPolicy::Unlimited => ("UNLIMITED", None),
        };
        sqlx::query(
            r#"
            INSERT INTO credit_tier (id, name, discount_bp, overdraft_kind, overdraft_limit, upgrade_threshold)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                discount_bp = EXCLUDED.discount_bp,
                overdraft_kind = EXCLUDED.overdraft_kind,
                overdraft_limit = EXCLUDED.overdraft_limit,
                upgrade_threshold = EXCLUDED.upgrade_threshold
            "#,
        )
        .bind(tier.id.get())
        .bind(&tier.name)
        .bind(basis_points(tier.discount_rate))
        .bind(kind)
        .bind(limit)
        .bind(tier.upgrade_threshold.cents())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_customer(&mut self, customer: NewCustomer) -> Result<Customer> {
        let row = sqlx::query(
            r#"
            INSERT INTO customer (name, balance, cumulative_spend, credit_tier_id, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&customer.name)
        .bind(customer.balance.cents())
        .bind(customer.cumulative_spend.cents())
        .bind(customer.credit_tier_id.get())
        .bind(customer.status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        row_to_customer(&row)
    }

    async fn get_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        self.load_customer(id, false).await
    }

    async fn lock_customer(&mut self, id: CustomerId) -> Result<Option<Customer>> {
        self.load_customer(id, true).await
    }

    async fn debit_customer(&mut self, id: CustomerId, amount: Money) -> Result<Customer> {
        let row = sqlx::query(
            r#"
            UPDATE customer
            SET balance = balance - $2, cumulative_spend = cumulative_spend + $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.get())
        .bind(amount.cents())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| not_found("customer", id))?;
        row_to_customer(&row)
    }

    async fn set_customer_tier(&mut self, id: CustomerId, tier: CreditTierId) -> Result<()> {
        let result = sqlx::query("UPDATE customer SET credit_tier_id = $2 WHERE id = $1")
            .bind(id.get())
            .bind(tier.get())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("customer", id));
        }
        Ok(())
    }

    async fn upsert_book(&mut self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO book (id, title, list_price) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title, list_price = EXCLUDED.list_price
            "#,
        )
        .bind(book.id.as_str())
        .bind(&book.title)
        .bind(book.list_price.cents())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_book(&mut self, id: &BookId) -> Result<Option<Book>> {
        let row = sqlx::query("SELECT id, title, list_price FROM book WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|row| {
            Ok(Book {
                id: BookId::new(row.try_get::<String, _>("id")?),
                title: row.try_get("title")?,
                list_price: money(&row, "list_price")?,
            })
        })
        .transpose()
    }

    async fn upsert_inventory(&mut self, record: &InventoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (book_id, quantity, safety_stock, location_code)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (book_id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                safety_stock = EXCLUDED.safety_stock,
                location_code = EXCLUDED.location_code
            "#,
        )
        .bind(record.book_id.as_str())
        .bind(i64::from(record.quantity))
        .bind(i64::from(record.safety_stock))
        .bind(&record.location_code)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_inventory(&mut self, book_id: &BookId) -> Result<Option<InventoryRecord>> {
        sqlx::query("SELECT * FROM inventory WHERE book_id = $1")
            .bind(book_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_inventory)
            .transpose()
    }

    async fn increase_inventory(
        &mut self,
        book_id: &BookId,
        delta: u32,
    ) -> Result<InventoryRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO inventory (book_id, quantity, safety_stock) VALUES ($1, $2, 0)
            ON CONFLICT (book_id) DO UPDATE SET quantity = inventory.quantity + EXCLUDED.quantity
            RETURNING *
            "#,
        )
        .bind(book_id.as_str())
        .bind(i64::from(delta))
        .fetch_one(&mut *self.tx)
        .await?;
        accumulated(&row, "quantity", book_id, delta)?;
        row_to_inventory(&row)
    }

    async fn decrease_inventory(
        &mut self,
        book_id: &BookId,
        delta: u32,
    ) -> Result<Option<InventoryRecord>> {
        sqlx::query(
            r#"
            UPDATE inventory SET quantity = quantity - $2
            WHERE book_id = $1 AND quantity >= $2
            RETURNING *
            "#,
        )
        .bind(book_id.as_str())
        .bind(i64::from(delta))
        .fetch_optional(&mut *self.tx)
        .await?
        .as_ref()
        .map(row_to_inventory)
        .transpose()
    }

    async fn upsert_pending_shortage(&mut self, raise: &NewShortage) -> Result<ShortageEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO shortage_entry
                (book_id, required_quantity, record_date, source, related_customer_id, status, priority)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', COALESCE($6, 1))
            ON CONFLICT (book_id, status) DO UPDATE SET
                required_quantity = shortage_entry.required_quantity + EXCLUDED.required_quantity,
                record_date = EXCLUDED.record_date,
                source = EXCLUDED.source,
                related_customer_id = COALESCE(EXCLUDED.related_customer_id, shortage_entry.related_customer_id),
                priority = COALESCE($6, shortage_entry.priority)
            RETURNING *
            "#,
        )
        .bind(raise.book_id.as_str())
        .bind(i64::from(raise.quantity))
        .bind(raise.record_date)
        .bind(raise.source.as_str())
        .bind(raise.related_customer_id.map(|c| c.get()))
        .bind(raise.priority)
        .fetch_one(&mut *self.tx)
        .await?;
        accumulated(&row, "required_quantity", &raise.book_id, raise.quantity)?;
        row_to_shortage(&row)
    }

    async fn get_shortage(&mut self, id: ShortageEntryId) -> Result<Option<ShortageEntry>> {
        sqlx::query("SELECT * FROM shortage_entry WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_shortage)
            .transpose()
    }

    async fn find_shortage(
        &mut self,
        book_id: &BookId,
        status: ShortageStatus,
    ) -> Result<Option<ShortageEntry>> {
        sqlx::query("SELECT * FROM shortage_entry WHERE book_id = $1 AND status = $2 FOR UPDATE")
            .bind(book_id.as_str())
            .bind(status.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_shortage)
            .transpose()
    }

    async fn list_shortages(
        &mut self,
        status: Option<ShortageStatus>,
    ) -> Result<Vec<ShortageEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM shortage_entry
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY priority DESC, record_date ASC, id ASC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(row_to_shortage).collect()
    }

    async fn update_shortage(&mut self, entry: &ShortageEntry) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE shortage_entry
            SET required_quantity = $2, status = $3, priority = $4, record_date = $5
            WHERE id = $1
            "#,
        )
        .bind(entry.id.get())
        .bind(i64::from(entry.required_quantity))
        .bind(entry.status.as_str())
        .bind(entry.priority)
        .bind(entry.record_date)
        .execute(&mut *self.tx)
        .await
        .map_err(map_unique)?;
        if result.rows_affected() == 0 {
            return Err(not_found("shortage entry", entry.id));
        }
        Ok(())
    }

    async fn delete_shortage(&mut self, id: ShortageEntryId) -> Result<()> {
        sqlx::query("DELETE FROM shortage_entry WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn redirect_shortage_references(
        &mut self,
        from: ShortageEntryId,
        to: ShortageEntryId,
    ) -> Result<u64> {
        let lines =
            sqlx::query("UPDATE purchase_line SET related_entry_id = $2 WHERE related_entry_id = $1")
                .bind(from.get())
                .bind(to.get())
                .execute(&mut *self.tx)
                .await?;
        let requests = sqlx::query(
            "UPDATE customer_shortage_request SET related_entry_id = $2 WHERE related_entry_id = $1",
        )
        .bind(from.get())
        .bind(to.get())
        .execute(&mut *self.tx)
        .await?;
        Ok(lines.rows_affected() + requests.rows_affected())
    }

    async fn insert_shortage_request(
        &mut self,
        request: NewShortageRequest,
    ) -> Result<CustomerShortageRequest> {
        let processed_at = (request.status != domain::RequestStatus::Pending)
            .then_some(request.created_at);
        let row = sqlx::query(
            r#"
            INSERT INTO customer_shortage_request
                (order_id, customer_id, book_id, requested_qty, customer_note, paid,
                 processed_status, related_entry_id, notified, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(request.order_id.get())
        .bind(request.customer_id.get())
        .bind(request.book_id.as_str())
        .bind(i64::from(request.requested_qty))
        .bind(&request.customer_note)
        .bind(request.paid)
        .bind(request.status.as_str())
        .bind(request.related_entry_id.map(|e| e.get()))
        .bind(request.notified)
        .bind(request.created_at)
        .bind(processed_at)
        .fetch_one(&mut *self.tx)
        .await?;
        row_to_request(&row)
    }

    async fn get_shortage_request(
        &mut self,
        id: ShortageRequestId,
    ) -> Result<Option<CustomerShortageRequest>> {
        sqlx::query("SELECT * FROM customer_shortage_request WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(row_to_request)
            .transpose()
    }

    async fn list_requests_for_order(
        &mut self,
        order_id: OrderId,
    ) -> Result<Vec<CustomerShortageRequest>> {
        let rows =
            sqlx::query("SELECT * FROM customer_shortage_request WHERE order_id = $1 ORDER BY id")
                .bind(order_id.get())
                .fetch_all(&mut *self.tx)
                .await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn list_pending_requests(&mut self) -> Result<Vec<CustomerShortageRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM customer_shortage_request WHERE processed_status = 'PENDING' ORDER BY id",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn update_shortage_request(&mut self, request: &CustomerShortageRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE customer_shortage_request
            SET paid = $2, processed_status = $3, related_entry_id = $4, notified = $5,
                processed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(request.id.get())
        .bind(request.paid)
        .bind(request.status.as_str())
        .bind(request.related_entry_id.map(|e| e.get()))
        .bind(request.notified)
        .bind(request.processed_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("shortage request", request.id));
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let goods = order.goods_amount();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sales_order
                (customer_id, status, goods_amount, discount_bp, payable_amount,
                 shipping_address, customer_note, order_time)
            VALUES ($1, 'PENDING_PAYMENT', $2, $3, $2, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(order.customer_id.get())
        .bind(goods.cents())
        .bind(basis_points(order.discount_rate))
        .bind(&order.shipping_address)
        .bind(&order.customer_note)
        .bind(order.order_time)
        .fetch_one(&mut *self.tx)
        .await?;

        let mut line_ids = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let line_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO order_line
                    (order_id, book_id, quantity, unit_price, sub_amount, line_status)
                VALUES ($1, $2, $3, $4, $5, 'ORDERED')
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(line.book_id.as_str())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.cents())
            .bind(line.sub_amount.cents())
            .fetch_one(&mut *self.tx)
            .await?;
            line_ids.push(OrderLineId::new(line_id));
        }

        Ok(order.into_order(OrderId::new(id), &line_ids))
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.load_order(id, false).await
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.load_order(id, true).await
    }

    async fn save_order(&mut self, order: &Order) -> Result<()> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT status FROM sales_order WHERE id = $1 FOR UPDATE")
                .bind(order.id.get())
                .fetch_optional(&mut *self.tx)
                .await?;
        let stored: domain::OrderStatus = stored
            .ok_or_else(|| not_found("order", order.id))?
            .parse()
            .map_err(StoreError::InvalidData)?;
        if !stored.can_become(order.status) {
            return Err(StoreError::IllegalStatusChange {
                order_id: order.id,
                from: stored,
                to: order.status,
            });
        }

        sqlx::query(
            r#"
            UPDATE sales_order
            SET status = $2, payment_time = $3, delivery_time = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id.get())
        .bind(order.status.as_str())
        .bind(order.payment_time)
        .bind(order.delivery_time)
        .execute(&mut *self.tx)
        .await?;

        for line in &order.lines {
            sqlx::query(
                r#"
                UPDATE order_line
                SET shipped_quantity = $2, received_quantity = $3, line_status = $4
                WHERE id = $1
                "#,
            )
            .bind(line.id.get())
            .bind(i64::from(line.shipped_quantity))
            .bind(i64::from(line.received_quantity))
            .bind(line.status.as_str())
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_shipment(&mut self, shipment: NewShipment) -> Result<Shipment> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO shipment (order_id, ship_time, carrier, tracking_number, status, operator)
            VALUES ($1, $2, $3, $4, 'SHIPPED', $5)
            RETURNING id
            "#,
        )
        .bind(shipment.order_id.get())
        .bind(shipment.ship_time)
        .bind(&shipment.carrier)
        .bind(&shipment.tracking_number)
        .bind(&shipment.operator)
        .fetch_one(&mut *self.tx)
        .await?;

        let mut lines = Vec::with_capacity(shipment.lines.len());
        for &(order_line_id, ship_quantity) in &shipment.lines {
            let row = sqlx::query(
                r#"
                INSERT INTO shipment_line (shipment_id, order_line_id, ship_quantity, receive_status)
                VALUES ($1, $2, $3, 'PENDING')
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(order_line_id.get())
            .bind(i64::from(ship_quantity))
            .fetch_one(&mut *self.tx)
            .await?;
            lines.push(row_to_shipment_line(&row)?);
        }

        Ok(Shipment {
            id: ShipmentId::new(id),
            order_id: shipment.order_id,
            ship_time: shipment.ship_time,
            carrier: shipment.carrier,
            tracking_number: shipment.tracking_number,
            status: domain::ShipmentStatus::Shipped,
            operator: shipment.operator,
            lines,
        })
    }

    async fn list_shipments(&mut self, order_id: OrderId) -> Result<Vec<Shipment>> {
        let headers = sqlx::query("SELECT * FROM shipment WHERE order_id = $1 ORDER BY id")
            .bind(order_id.get())
            .fetch_all(&mut *self.tx)
            .await?;
        let line_rows = sqlx::query(
            r#"
            SELECT sl.* FROM shipment_line sl
            JOIN shipment s ON s.id = sl.shipment_id
            WHERE s.order_id = $1
            ORDER BY sl.id
            "#,
        )
        .bind(order_id.get())
        .fetch_all(&mut *self.tx)
        .await?;

        let mut lines_by_shipment: BTreeMap<ShipmentId, Vec<ShipmentLine>> = BTreeMap::new();
        for row in &line_rows {
            let line = row_to_shipment_line(row)?;
            lines_by_shipment
                .entry(line.shipment_id)
                .or_default()
                .push(line);
        }

        headers
            .iter()
            .map(|row| {
                let id = ShipmentId::new(row.try_get("id")?);
                Ok(Shipment {
                    id,
                    order_id,
                    ship_time: row.try_get("ship_time")?,
                    carrier: row.try_get("carrier")?,
                    tracking_number: row.try_get("tracking_number")?,
                    status: parsed(row, "status")?,
                    operator: row.try_get("operator")?,
                    lines: lines_by_shipment.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn save_shipment(&mut self, shipment: &Shipment) -> Result<()> {
        sqlx::query("UPDATE shipment SET status = $2 WHERE id = $1")
            .bind(shipment.id.get())
            .bind(shipment.status.as_str())
            .execute(&mut *self.tx)
            .await?;
        for line in &shipment.lines {
            sqlx::query(
                r#"
                UPDATE shipment_line
                SET received_quantity = $2, receive_status = $3, received_time = $4
                WHERE id = $1
                "#,
            )
            .bind(line.id.get())
            .bind(i64::from(line.received_quantity))
            .bind(line.receive_status.as_str())
            .bind(line.received_time)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn upsert_supply_agreement(&mut self, agreement: &SupplyAgreement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO supply_agreement (supplier_id, book_id, supply_price, is_primary)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (supplier_id, book_id, is_primary)
            DO UPDATE SET supply_price = EXCLUDED.supply_price
            "#,
        )
        .bind(agreement.supplier_id.get())
        .bind(agreement.book_id.as_str())
        .bind(agreement.supply_price.cents())
        .bind(agreement.primary)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_supply_agreements(
        &mut self,
        supplier_id: SupplierId,
        book_id: &BookId,
    ) -> Result<Vec<SupplyAgreement>> {
        let rows = sqlx::query(
            r#"
            SELECT supplier_id, book_id, supply_price, is_primary FROM supply_agreement
            WHERE supplier_id = $1 AND book_id = $2
            ORDER BY is_primary DESC
            "#,
        )
        .bind(supplier_id.get())
        .bind(book_id.as_str())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(SupplyAgreement {
                    supplier_id,
                    book_id: book_id.clone(),
                    supply_price: money(row, "supply_price")?,
                    primary: row.try_get("is_primary")?,
                })
            })
            .collect()
    }

    async fn insert_purchase_order(&mut self, order: NewPurchaseOrder) -> Result<PurchaseOrder> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO purchase_order
                (supplier_id, create_date, expected_date, buyer, estimated_amount, status)
            VALUES ($1, $2, $3, $4, $5, 'ISSUED')
            RETURNING id
            "#,
        )
        .bind(order.supplier_id.get())
        .bind(order.create_date)
        .bind(order.expected_date)
        .bind(&order.buyer)
        .bind(order.estimated_amount().cents())
        .fetch_one(&mut *self.tx)
        .await?;

        let mut line_ids = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let line_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO purchase_line
                    (purchase_order_id, book_id, quantity, unit_price, related_entry_id)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(id)
            .bind(line.book_id.as_str())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.cents())
            .bind(line.related_entry_id.map(|e| e.get()))
            .fetch_one(&mut *self.tx)
            .await?;
            line_ids.push(PurchaseLineId::new(line_id));
        }

        Ok(order.into_purchase_order(PurchaseOrderId::new(id), &line_ids))
    }

    async fn get_purchase_order(&mut self, id: PurchaseOrderId) -> Result<Option<PurchaseOrder>> {
        self.load_purchase_order(id, false).await
    }

    async fn lock_purchase_order(
        &mut self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>> {
        self.load_purchase_order(id, true).await
    }

    async fn set_purchase_status(
        &mut self,
        id: PurchaseOrderId,
        status: PurchaseStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE purchase_order SET status = $2 WHERE id = $1")
            .bind(id.get())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(not_found("purchase order", id));
        }
        Ok(())
    }

    async fn record_event(&mut self, event: &FulfillmentEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        sqlx::query(
            "INSERT INTO fulfillment_event (order_id, event_type, payload) VALUES ($1, $2, $3)",
        )
        .bind(event.order_id().map(|id| id.get()))
        .bind(event.event_type())
        .bind(payload)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_events(&mut self, order_id: OrderId) -> Result<Vec<RecordedEvent>> {
        let rows =
            sqlx::query("SELECT * FROM fulfillment_event WHERE order_id = $1 ORDER BY sequence")
                .bind(order_id.get())
                .fetch_all(&mut *self.tx)
                .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        tracing::debug!("unit of work committed");
        Ok(())
    }
}
