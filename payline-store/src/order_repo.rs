use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payline_order::{
    Address, ClientReference, Item, Order, OrderRecord, OrderRepository, OrderState, Payment, PaymentRecord,
    PaymentState, RepositoryError, Tax, Transaction, TransactionRecord, TransactionState,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, unique_id, currency_code, client_id, client_email, client_name, locale, country, \
     region_code, state, total_without_taxes, total_with_taxes, total_refunded, billing_address, shipping_address, \
     version, created_at, updated_at";

/// Order repository backed by Postgres; one database transaction per save
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, row: OrderRow) -> Result<Order, RepositoryError> {
        let items = sqlx::query_as::<_, ItemRow>(
            "SELECT id, order_id, sku, quantity, unit_price, product_reference, item_data_reference \
             FROM order_items WHERE order_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(ItemRow::into_item)
        .collect::<Result<Vec<_>, _>>()?;

        let taxes = sqlx::query_as::<_, TaxRow>(
            "SELECT order_id, tax_name, tax_number, rate, total FROM order_taxes WHERE order_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(TaxRow::into_tax)
        .collect();

        let payment_rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, order_id, state, gateway_name, provider_transaction_reference, amount, is_refund, \
             redirect_url, data, created_at, updated_at FROM payments WHERE order_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let payment_ids: Vec<Uuid> = payment_rows.iter().map(|p| p.id).collect();
        let mut transaction_rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, payment_id, kind, state, error_code, error_message, request_data, response_data, created_at \
             FROM payment_transactions WHERE payment_id = ANY($1) ORDER BY position",
        )
        .bind(&payment_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut payments = Vec::with_capacity(payment_rows.len());
        for payment_row in payment_rows {
            let (mine, rest): (Vec<_>, Vec<_>) = transaction_rows
                .into_iter()
                .partition(|t| t.payment_id == payment_row.id);
            transaction_rows = rest;

            let transactions = mine
                .into_iter()
                .map(TransactionRow::into_transaction)
                .collect::<Result<Vec<_>, _>>()?;
            payments.push(payment_row.into_payment(transactions)?);
        }

        let record = row.into_record()?;
        Ok(Order::from_record(record, items, taxes, payments))
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn save(&self, order: &mut Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        let stored = stored.unwrap_or(0) as u64;
        if stored != order.version() {
            return Err(RepositoryError::Conflict {
                id: order.id,
                expected: order.version(),
                found: stored,
            });
        }

        order.compute_on_save();
        let next_version = stored + 1;
        let record = order.to_record();

        sqlx::query(
            r#"
            INSERT INTO orders (id, unique_id, currency_code, client_id, client_email, client_name, locale, country,
                region_code, state, total_without_taxes, total_with_taxes, total_refunded, billing_address,
                shipping_address, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO UPDATE SET
                unique_id = EXCLUDED.unique_id,
                currency_code = EXCLUDED.currency_code,
                client_id = EXCLUDED.client_id,
                client_email = EXCLUDED.client_email,
                client_name = EXCLUDED.client_name,
                locale = EXCLUDED.locale,
                country = EXCLUDED.country,
                region_code = EXCLUDED.region_code,
                state = EXCLUDED.state,
                total_without_taxes = EXCLUDED.total_without_taxes,
                total_with_taxes = EXCLUDED.total_with_taxes,
                total_refunded = EXCLUDED.total_refunded,
                billing_address = EXCLUDED.billing_address,
                shipping_address = EXCLUDED.shipping_address,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.unique_id)
        .bind(&record.currency_code)
        .bind(record.client.id)
        .bind(&record.client.email)
        .bind(&record.client.name)
        .bind(&record.locale)
        .bind(&record.country)
        .bind(&record.region_code)
        .bind(record.state.as_str())
        .bind(record.total_without_taxes)
        .bind(record.total_with_taxes)
        .bind(record.total_refunded)
        .bind(Json(&record.billing_address))
        .bind(Json(&record.shipping_address))
        .bind(next_version as i64)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        // Children are rewritten wholesale; cascades clear payment transactions
        for table in ["order_items", "order_taxes", "payments"] {
            sqlx::query(&format!("DELETE FROM {} WHERE order_id = $1", table))
                .bind(order.id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, position, sku, quantity, unit_price, product_reference, \
                 item_data_reference) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(position as i32)
            .bind(&item.sku)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price)
            .bind(&item.product_reference)
            .bind(&item.item_data_reference)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for (position, tax) in order.taxes().iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_taxes (order_id, tax_name, position, tax_number, rate, total) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(tax.order_id)
            .bind(&tax.tax_name)
            .bind(position as i32)
            .bind(&tax.tax_number)
            .bind(tax.rate)
            .bind(tax.total)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for (position, payment) in order.payments().iter().enumerate() {
            insert_payment(&mut tx, position, payment).await?;
        }

        tx.commit().await.map_err(backend)?;
        order.mark_saved(next_version);

        tracing::debug!("Persisted order {} at version {}", order.id, next_version);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE unique_id = $1", ORDER_COLUMNS))
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self, client_id: Option<i64>) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE ($1::BIGINT IS NULL OR client_id = $1) ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}

async fn insert_payment(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    position: usize,
    payment: &Payment,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO payments (id, order_id, position, state, gateway_name, provider_transaction_reference, amount, \
         is_refund, redirect_url, data, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(position as i32)
    .bind(payment.state().as_str())
    .bind(&payment.gateway_name)
    .bind(&payment.provider_transaction_reference)
    .bind(payment.amount())
    .bind(payment.is_refund())
    .bind(&payment.redirect_url)
    .bind(Json(&payment.data))
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(backend)?;

    for (position, transaction) in payment.transactions().iter().enumerate() {
        sqlx::query(
            "INSERT INTO payment_transactions (id, payment_id, position, kind, state, error_code, error_message, \
             request_data, response_data, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(transaction.id)
        .bind(transaction.payment_id)
        .bind(position as i32)
        .bind(transaction.kind())
        .bind(transaction.state().as_str())
        .bind(&transaction.error_code)
        .bind(&transaction.error_message)
        .bind(Json(transaction.request_data()))
        .bind(transaction.response_data().map(Json))
        .bind(transaction.created_at)
        .execute(&mut **tx)
        .await
        .map_err(backend)?;
    }
    Ok(())
}

fn backend(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

fn corrupt(what: &str, value: &str) -> RepositoryError {
    RepositoryError::Backend(format!("stored {} {:?} is not recognised", what, value))
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    unique_id: Option<String>,
    currency_code: String,
    client_id: Option<i64>,
    client_email: Option<String>,
    client_name: Option<String>,
    locale: String,
    country: Option<String>,
    region_code: Option<String>,
    state: String,
    total_without_taxes: Option<Decimal>,
    total_with_taxes: Option<Decimal>,
    total_refunded: Option<Decimal>,
    billing_address: Json<Address>,
    shipping_address: Json<Address>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_record(self) -> Result<OrderRecord, RepositoryError> {
        let state = OrderState::parse(&self.state).ok_or_else(|| corrupt("order state", &self.state))?;
        Ok(OrderRecord {
            id: self.id,
            unique_id: self.unique_id,
            currency_code: self.currency_code,
            client: ClientReference {
                id: self.client_id,
                email: self.client_email,
                name: self.client_name,
            },
            locale: self.locale,
            country: self.country,
            region_code: self.region_code,
            state,
            total_without_taxes: self.total_without_taxes,
            total_with_taxes: self.total_with_taxes,
            total_refunded: self.total_refunded,
            billing_address: self.billing_address.0,
            shipping_address: self.shipping_address.0,
            version: self.version as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    order_id: Uuid,
    sku: String,
    quantity: i64,
    unit_price: Decimal,
    product_reference: Option<String>,
    item_data_reference: Option<String>,
}

impl ItemRow {
    fn into_item(self) -> Result<Item, RepositoryError> {
        let quantity = u32::try_from(self.quantity).map_err(|_| corrupt("quantity", &self.quantity.to_string()))?;
        Ok(Item {
            id: self.id,
            order_id: self.order_id,
            sku: self.sku,
            quantity,
            unit_price: self.unit_price,
            product_reference: self.product_reference,
            item_data_reference: self.item_data_reference,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaxRow {
    order_id: Uuid,
    tax_name: String,
    tax_number: String,
    rate: Decimal,
    total: Decimal,
}

impl TaxRow {
    fn into_tax(self) -> Tax {
        Tax {
            order_id: self.order_id,
            tax_name: self.tax_name,
            tax_number: self.tax_number,
            rate: self.rate,
            total: self.total,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    state: String,
    gateway_name: String,
    provider_transaction_reference: Option<String>,
    amount: Decimal,
    is_refund: bool,
    redirect_url: Option<String>,
    data: Json<Map<String, Value>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self, transactions: Vec<Transaction>) -> Result<Payment, RepositoryError> {
        let state = PaymentState::parse(&self.state).ok_or_else(|| corrupt("payment state", &self.state))?;
        let record = PaymentRecord {
            id: self.id,
            order_id: self.order_id,
            state,
            gateway_name: self.gateway_name,
            provider_transaction_reference: self.provider_transaction_reference,
            amount: self.amount,
            is_refund: self.is_refund,
            redirect_url: self.redirect_url,
            data: self.data.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        Ok(Payment::from_record(record, transactions))
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    payment_id: Uuid,
    kind: String,
    state: String,
    error_code: Option<String>,
    error_message: Option<String>,
    request_data: Json<Map<String, Value>>,
    response_data: Option<Json<Map<String, Value>>>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> Result<Transaction, RepositoryError> {
        let state = TransactionState::parse(&self.state).ok_or_else(|| corrupt("transaction state", &self.state))?;
        Ok(Transaction::from_record(TransactionRecord {
            id: self.id,
            payment_id: self.payment_id,
            kind: self.kind,
            state,
            error_code: self.error_code,
            error_message: self.error_message,
            request_data: self.request_data.0,
            response_data: self.response_data.map(|j| j.0),
            created_at: self.created_at,
        }))
    }
}
