use chrono::{DateTime, Utc};
use payline_catalog::{ItemData, Product, TaxRateSnapshot};
use payline_shared::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payment::Payment;
use crate::totals::{compute_totals, Totals};

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Created, not yet sent to any payment provider
    New,
    /// A payment is in flight
    InProcess,
    /// A payment was attempted but did not complete
    Incomplete,
    Paid,
    Completed,
    PartiallyRefunded,
    Refunded,
    /// Can be set at any point; the order must not change afterwards
    Void,
    Archived,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProcess => "IN_PROCESS",
            Self::Incomplete => "INCOMPLETE",
            Self::Paid => "PAID",
            Self::Completed => "COMPLETED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED",
            Self::Refunded => "REFUNDED",
            Self::Void => "VOID",
            Self::Archived => "ARCHIVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }

    /// States in which a new payment may be started
    pub fn accepts_payment(&self) -> bool {
        matches!(self, Self::New | Self::InProcess | Self::Incomplete)
    }
}

/// Who placed the order, captured at creation time
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientReference {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Postal address value object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub country_code: Option<String>,
    pub administrative_area: Option<String>,
    pub locality: Option<String>,
    pub dependent_locality: Option<String>,
    pub postal_code: Option<String>,
    pub sorting_code: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub recipient: Option<String>,
    pub organization: Option<String>,
    pub locale: Option<String>,
}

/// A purchased line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: Uuid,
    pub order_id: Uuid,
    pub sku: String,
    pub quantity: u32,
    /// Price as supplied; line totals are computed from it before rounding
    pub unit_price: Decimal,
    pub product_reference: Option<String>,
    pub item_data_reference: Option<String>,
}

/// Largest quantity accepted on a single line
pub const MAX_QUANTITY: u32 = 1_000_000;

/// Largest unit price accepted on a single line
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

impl Item {
    pub fn new(order_id: Uuid, sku: impl Into<String>, quantity: u32, unit_price: Decimal) -> Result<Self, OrderError> {
        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(OrderError::Validation("item sku is required".to_string()));
        }
        validate_quantity(quantity)?;
        if unit_price.is_sign_negative() {
            return Err(OrderError::Validation(format!("unit price {} is negative", unit_price)));
        }
        if unit_price > MAX_UNIT_PRICE {
            return Err(OrderError::Validation(format!(
                "unit price {} exceeds {}",
                unit_price, MAX_UNIT_PRICE
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            sku,
            quantity,
            unit_price,
            product_reference: None,
            item_data_reference: None,
        })
    }

    /// Line for a host product; sku and price are copied from the product
    pub fn from_product(order_id: Uuid, product: &dyn Product, quantity: u32) -> Result<Self, OrderError> {
        let mut item = Self::new(order_id, product.application_sku(), quantity, product.unit_price())?;
        item.product_reference = Some(product.reference_id());
        Ok(item)
    }

    pub fn attach_item_data(&mut self, data: &mut dyn ItemData) {
        self.item_data_reference = Some(data.item_data_reference_id());
        data.set_order_item(self.id);
    }

    /// Unit price rounded to cents
    pub fn rounded_unit_price(&self) -> Decimal {
        round_money(self.unit_price)
    }

    pub fn total_price(&self) -> Decimal {
        round_money(Decimal::from(self.quantity) * self.unit_price)
    }
}

/// A tax charged on an order, identified by its name within the order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tax {
    pub order_id: Uuid,
    pub tax_name: String,
    pub tax_number: String,
    /// Snapshotted when attached; never refreshed from the configuration
    pub rate: Decimal,
    pub total: Decimal,
}

impl Tax {
    pub fn from_snapshot(order_id: Uuid, snapshot: TaxRateSnapshot) -> Self {
        Self {
            order_id,
            tax_name: snapshot.tax_name,
            tax_number: snapshot.tax_number,
            rate: snapshot.rate,
            total: round_money(Decimal::ZERO),
        }
    }
}

/// Persisted scalar state of an order, without its children
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub unique_id: Option<String>,
    pub currency_code: String,
    pub client: ClientReference,
    pub locale: String,
    pub country: Option<String>,
    pub region_code: Option<String>,
    pub state: OrderState,
    pub total_without_taxes: Option<Decimal>,
    pub total_with_taxes: Option<Decimal>,
    pub total_refunded: Option<Decimal>,
    pub billing_address: Address,
    pub shipping_address: Address,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The aggregate root for a client's purchase
///
/// Children are only reachable through the order, so every structural
/// change goes through a method that marks the totals dirty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    unique_id: Option<String>,
    pub currency_code: String,
    pub client: ClientReference,
    pub locale: String,
    pub country: Option<String>,
    pub region_code: Option<String>,
    pub state: OrderState,
    items: Vec<Item>,
    taxes: Vec<Tax>,
    payments: Vec<Payment>,
    total_without_taxes: Option<Decimal>,
    total_with_taxes: Option<Decimal>,
    total_refunded: Option<Decimal>,
    pub billing_address: Address,
    pub shipping_address: Address,
    #[serde(skip)]
    totals_dirty: bool,
    version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(currency_code: &str) -> Result<Self, OrderError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            unique_id: None,
            currency_code: normalize_currency(currency_code)?,
            client: ClientReference::default(),
            locale: "en_US".to_string(),
            country: None,
            region_code: None,
            state: OrderState::New,
            items: Vec::new(),
            taxes: Vec::new(),
            payments: Vec::new(),
            total_without_taxes: None,
            total_with_taxes: None,
            total_refunded: None,
            billing_address: Address::default(),
            shipping_address: Address::default(),
            totals_dirty: false,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild an order loaded from storage
    pub fn from_record(record: OrderRecord, items: Vec<Item>, taxes: Vec<Tax>, payments: Vec<Payment>) -> Self {
        Self {
            id: record.id,
            unique_id: record.unique_id,
            currency_code: record.currency_code,
            client: record.client,
            locale: record.locale,
            country: record.country,
            region_code: record.region_code,
            state: record.state,
            items,
            taxes,
            payments,
            total_without_taxes: record.total_without_taxes,
            total_with_taxes: record.total_with_taxes,
            total_refunded: record.total_refunded,
            billing_address: record.billing_address,
            shipping_address: record.shipping_address,
            totals_dirty: false,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn to_record(&self) -> OrderRecord {
        OrderRecord {
            id: self.id,
            unique_id: self.unique_id.clone(),
            currency_code: self.currency_code.clone(),
            client: self.client.clone(),
            locale: self.locale.clone(),
            country: self.country.clone(),
            region_code: self.region_code.clone(),
            state: self.state,
            total_without_taxes: self.total_without_taxes,
            total_with_taxes: self.total_with_taxes,
            total_refunded: self.total_refunded,
            billing_address: self.billing_address.clone(),
            shipping_address: self.shipping_address.clone(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record the version written by a repository
    pub fn mark_saved(&mut self, version: u64) {
        self.version = version;
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn taxes(&self) -> &[Tax] {
        &self.taxes
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn is_dirty(&self) -> bool {
        self.totals_dirty
    }

    /// Add a line; adding the same line twice is a no-op.
    pub fn add_item(&mut self, item: Item) -> Result<bool, OrderError> {
        self.ensure_owned(item.order_id)?;
        if self.items.iter().any(|i| i.id == item.id) {
            return Ok(false);
        }

        self.items.push(item);
        self.mark_dirty();
        Ok(true)
    }

    pub fn remove_item(&mut self, item_id: Uuid) -> Option<Item> {
        let index = self.items.iter().position(|i| i.id == item_id)?;
        let item = self.items.remove(index);
        self.mark_dirty();
        Some(item)
    }

    pub fn update_item_quantity(&mut self, item_id: Uuid, quantity: u32) -> Result<(), OrderError> {
        validate_quantity(quantity)?;
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(OrderError::ItemNotFound(item_id))?;

        if item.quantity != quantity {
            item.quantity = quantity;
            self.mark_dirty();
        }
        Ok(())
    }

    /// Attach a tax; a tax with the same name is only attached once.
    pub fn add_tax(&mut self, tax: Tax) -> Result<bool, OrderError> {
        self.ensure_owned(tax.order_id)?;
        if self.taxes.iter().any(|t| t.tax_name == tax.tax_name) {
            return Ok(false);
        }

        self.taxes.push(tax);
        self.mark_dirty();
        Ok(true)
    }

    pub fn add_payment(&mut self, payment: Payment) -> Result<bool, OrderError> {
        self.ensure_owned(payment.order_id)?;
        if self.payments.iter().any(|p| p.id == payment.id) {
            return Ok(false);
        }

        self.payments.push(payment);
        self.mark_dirty();
        Ok(true)
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == payment_id)
    }

    /// Mutable access to a payment; its state feeds the refund total, so the order is marked dirty.
    pub fn payment_mut(&mut self, payment_id: Uuid) -> Option<&mut Payment> {
        let index = self.payments.iter().position(|p| p.id == payment_id)?;
        self.mark_dirty();
        self.payments.get_mut(index)
    }

    /// Recompute totals when forced, dirty, or never computed.
    ///
    /// Returns whether a recomputation happened.
    pub fn compute_totals(&mut self, force: bool) -> bool {
        if !force && !self.totals_dirty && self.total_without_taxes.is_some() {
            return false;
        }

        let Totals {
            total_without_taxes,
            tax_totals,
            total_with_taxes,
            total_refunded,
        } = compute_totals(&self.items, &self.taxes, &self.payments);

        for (tax, total) in self.taxes.iter_mut().zip(tax_totals) {
            tax.total = total;
        }
        self.total_without_taxes = Some(total_without_taxes);
        self.total_with_taxes = Some(total_with_taxes);
        self.total_refunded = Some(total_refunded);
        self.totals_dirty = false;
        true
    }

    /// Pre-save hook: assigns the external id on first save and refreshes totals.
    pub fn compute_on_save(&mut self) {
        if self.unique_id.is_none() {
            self.unique_id = Some(Uuid::new_v4().simple().to_string());
        }
        self.compute_totals(false);
    }

    pub fn total_without_taxes(&self) -> Option<Decimal> {
        self.total_without_taxes
    }

    pub fn total_with_taxes(&self) -> Option<Decimal> {
        self.total_with_taxes
    }

    /// Final amount the client must pay
    pub fn total(&self) -> Option<Decimal> {
        self.total_with_taxes
    }

    pub fn total_refunded(&self) -> Option<Decimal> {
        self.total_refunded
    }

    pub fn taxes_total(&self) -> Decimal {
        round_money(
            self.total_with_taxes.unwrap_or_default() - self.total_without_taxes.unwrap_or_default(),
        )
    }

    /// Update order status
    pub fn update_state(&mut self, new_state: OrderState) {
        self.state = new_state;
        self.updated_at = Utc::now();
    }

    fn mark_dirty(&mut self) {
        self.totals_dirty = true;
        self.updated_at = Utc::now();
    }

    fn ensure_owned(&self, order_id: Uuid) -> Result<(), OrderError> {
        if order_id != self.id {
            return Err(OrderError::Consistency(format!(
                "child belongs to order {} not {}",
                order_id, self.id
            )));
        }
        Ok(())
    }
}

fn normalize_currency(code: &str) -> Result<String, OrderError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(OrderError::Validation(format!("invalid currency code: {:?}", code)));
    }
    Ok(code.to_ascii_uppercase())
}

fn validate_quantity(quantity: u32) -> Result<(), OrderError> {
    if quantity == 0 {
        return Err(OrderError::Validation("item quantity must be greater than 0".to_string()));
    }
    if quantity > MAX_QUANTITY {
        return Err(OrderError::Validation(format!(
            "item quantity {} exceeds {}",
            quantity, MAX_QUANTITY
        )));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },
}
