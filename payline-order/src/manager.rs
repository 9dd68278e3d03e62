use chrono::Utc;
use payline_catalog::{ProductError, ProductProvider, TaxError, TaxRegistry};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{Address, ClientReference, Item, Order, OrderError, OrderState, Tax};
use crate::orchestrator::{OrchestratorError, PaymentOrchestrator};
use crate::payment::{Payment, PaymentState};
use crate::repository::{OrderRepository, RepositoryError};

/// Input for opening an order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOrder {
    pub currency_code: String,
    #[serde(default)]
    pub client: ClientReference,
    pub locale: Option<String>,
    pub country: Option<String>,
    pub region_code: Option<String>,
    #[serde(default)]
    pub billing_address: Address,
    #[serde(default)]
    pub shipping_address: Address,
}

/// Where a new line gets its sku and price from
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ItemSource {
    Product { product_reference: String },
    Custom { sku: String, unit_price: Decimal },
}

/// Manages order lifecycle; every mutation of one order runs under that order's lock
pub struct OrderManager {
    repository: Arc<dyn OrderRepository>,
    taxes: Arc<TaxRegistry>,
    products: Arc<dyn ProductProvider>,
    orchestrator: PaymentOrchestrator,
    locks: LockMap,
}

type LockMap = StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>;

/// Held while one order is mutated; the map entry goes away with the last holder
struct OrderLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    order_id: Uuid,
    locks: &'a LockMap,
}

impl Drop for OrderLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.order_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.order_id);
        }
    }
}

impl OrderManager {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        taxes: Arc<TaxRegistry>,
        products: Arc<dyn ProductProvider>,
        orchestrator: PaymentOrchestrator,
    ) -> Self {
        Self {
            repository,
            taxes,
            products,
            orchestrator,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn tax_registry(&self) -> &TaxRegistry {
        &self.taxes
    }

    /// Open an order; taxes of its region are attached right away.
    pub async fn create_order(&self, input: NewOrder) -> Result<Order, ManagerError> {
        let mut order = Order::new(&input.currency_code)?;
        order.client = input.client;
        if let Some(locale) = input.locale {
            order.locale = locale;
        }
        order.country = input.country;
        order.billing_address = input.billing_address;
        order.shipping_address = input.shipping_address;

        if let Some(region_code) = input.region_code {
            for snapshot in self.taxes.region_snapshots(&region_code, Utc::now()) {
                order.add_tax(Tax::from_snapshot(order.id, snapshot))?;
            }
            order.region_code = Some(region_code);
        }

        self.repository.save(&mut order).await?;
        tracing::info!(
            "Created order {} ({} taxes attached)",
            order.id,
            order.taxes().len()
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ManagerError> {
        self.repository
            .find(order_id)
            .await?
            .ok_or(ManagerError::NotFound(order_id))
    }

    pub async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Order>, ManagerError> {
        Ok(self.repository.find_by_unique_id(unique_id).await?)
    }

    pub async fn list_orders(&self, client_id: Option<i64>) -> Result<Vec<Order>, ManagerError> {
        Ok(self.repository.list(client_id).await?)
    }

    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ManagerError> {
        let _guard = self.lock(order_id).await;
        self.repository.delete(order_id).await.map_err(|e| match e {
            RepositoryError::NotFound(id) => ManagerError::NotFound(id),
            other => other.into(),
        })?;
        Ok(())
    }

    /// Add a line, resolving the product when a reference is given
    pub async fn add_item(
        &self,
        order_id: Uuid,
        source: ItemSource,
        quantity: u32,
    ) -> Result<(Order, Item), ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.load_editable(order_id).await?;

        let item = match source {
            ItemSource::Product { product_reference } => {
                let product = self
                    .products
                    .find_product(&product_reference)
                    .await?
                    .ok_or(ProductError::NotFound(product_reference))?;
                Item::from_product(order.id, &product, quantity)?
            }
            ItemSource::Custom { sku, unit_price } => Item::new(order.id, sku, quantity, unit_price)?,
        };

        order.add_item(item.clone())?;
        self.repository.save(&mut order).await?;
        Ok((order, item))
    }

    pub async fn update_item_quantity(&self, order_id: Uuid, item_id: Uuid, quantity: u32) -> Result<Order, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.load_editable(order_id).await?;

        order.update_item_quantity(item_id, quantity)?;
        self.repository.save(&mut order).await?;
        Ok(order)
    }

    pub async fn remove_item(&self, order_id: Uuid, item_id: Uuid) -> Result<Order, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.load_editable(order_id).await?;

        order.remove_item(item_id).ok_or(OrderError::ItemNotFound(item_id))?;
        self.repository.save(&mut order).await?;
        Ok(order)
    }

    /// Attach the rate currently in effect for a tax configuration
    pub async fn attach_tax(&self, order_id: Uuid, configuration_name: &str) -> Result<Order, ManagerError> {
        let snapshot = self
            .taxes
            .configuration(configuration_name)?
            .snapshot_at(Utc::now())?;

        let _guard = self.lock(order_id).await;
        let mut order = self.load_editable(order_id).await?;

        if !order.add_tax(Tax::from_snapshot(order.id, snapshot))? {
            tracing::debug!("Tax {} already on order {}", configuration_name, order_id);
        }
        self.repository.save(&mut order).await?;
        Ok(order)
    }

    pub async fn pay(&self, order_id: Uuid, data: Map<String, Value>) -> Result<Payment, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        Ok(self.orchestrator.create_payment(&mut order, data).await?)
    }

    pub async fn refund(&self, order_id: Uuid, amount: Decimal) -> Result<Payment, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        Ok(self.orchestrator.record_refund(&mut order, amount).await?)
    }

    /// Settle a pending charge as successful
    pub async fn confirm_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Payment, ManagerError> {
        self.settle_payment(order_id, payment_id, PaymentState::Success).await
    }

    /// Settle a pending charge as failed
    pub async fn fail_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Payment, ManagerError> {
        self.settle_payment(order_id, payment_id, PaymentState::Error).await
    }

    /// Abandon a pending charge; the order can then be paid again
    pub async fn cancel_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Payment, ManagerError> {
        self.settle_payment(order_id, payment_id, PaymentState::Cancel).await
    }

    async fn settle_payment(&self, order_id: Uuid, payment_id: Uuid, next: PaymentState) -> Result<Payment, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        Ok(self.orchestrator.settle_payment(&mut order, payment_id, next).await?)
    }

    pub async fn get_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Payment, ManagerError> {
        let order = self.get_order(order_id).await?;
        order
            .payment(payment_id)
            .cloned()
            .ok_or_else(|| OrderError::PaymentNotFound(payment_id).into())
    }

    /// Transition: Paid → Completed
    pub async fn complete_order(&self, order_id: Uuid) -> Result<Order, ManagerError> {
        self.transition(order_id, OrderState::Completed, |s| s == OrderState::Paid)
            .await
    }

    /// Void an order; allowed from any state but Archived
    pub async fn void_order(&self, order_id: Uuid) -> Result<Order, ManagerError> {
        self.transition(order_id, OrderState::Void, |s| s != OrderState::Archived)
            .await
    }

    /// Archive an order (final state)
    pub async fn archive_order(&self, order_id: Uuid) -> Result<Order, ManagerError> {
        self.transition(order_id, OrderState::Archived, |s| {
            matches!(s, OrderState::Completed | OrderState::Refunded | OrderState::Void)
        })
        .await
    }

    async fn transition(
        &self,
        order_id: Uuid,
        to: OrderState,
        allowed_from: impl Fn(OrderState) -> bool,
    ) -> Result<Order, ManagerError> {
        let _guard = self.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;

        if order.state != to {
            if !allowed_from(order.state) {
                return Err(OrderError::InvalidTransition {
                    from: order.state.as_str().to_string(),
                    to: to.as_str().to_string(),
                }
                .into());
            }
            order.update_state(to);
            self.repository.save(&mut order).await?;
            tracing::info!("Order {} moved to {}", order_id, to.as_str());
        }
        Ok(order)
    }

    async fn load_editable(&self, order_id: Uuid) -> Result<Order, ManagerError> {
        let order = self.get_order(order_id).await?;
        if !matches!(order.state, OrderState::New | OrderState::Incomplete) {
            return Err(ManagerError::NotEditable(order.state));
        }
        Ok(order)
    }

    async fn lock(&self, order_id: Uuid) -> OrderLock<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        OrderLock {
            guard: Some(lock.lock_owned().await),
            order_id,
            locks: &self.locks,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order cannot be modified in state {}", .0.as_str())]
    NotEditable(OrderState),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Tax(#[from] TaxError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Payment(#[from] OrchestratorError),
}
