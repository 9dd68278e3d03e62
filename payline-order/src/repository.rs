use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Order;

/// Persistence for the order aggregate
///
/// `save` runs the order's pre-save hook, rejects stale writes and bumps
/// the version on success.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &mut Order) -> Result<(), RepositoryError>;

    async fn find(&self, id: Uuid) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Order>, RepositoryError>;

    /// Orders, newest first, optionally restricted to one client
    async fn list(&self, client_id: Option<i64>) -> Result<Vec<Order>, RepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order {id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Repository keeping orders in process memory
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &mut Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;

        let stored = orders.get(&order.id).map(Order::version).unwrap_or(0);
        if stored != order.version() {
            return Err(RepositoryError::Conflict {
                id: order.id,
                expected: order.version(),
                found: stored,
            });
        }

        order.compute_on_save();
        order.mark_saved(stored + 1);
        orders.insert(order.id, order.clone());

        tracing::debug!("Saved order {} at version {}", order.id, order.version());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_unique_id(&self, unique_id: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.unique_id() == Some(unique_id))
            .cloned())
    }

    async fn list(&self, client_id: Option<i64>) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| client_id.is_none() || o.client.id == client_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.orders
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_save_assigns_unique_id_and_totals() {
        let repo = InMemoryOrderRepository::new();
        let mut order = Order::new("USD").unwrap();
        let line = Item::new(order.id, "SKU", 2, Decimal::new(250, 2)).unwrap();
        order.add_item(line).unwrap();

        repo.save(&mut order).await.unwrap();
        assert_eq!(order.version(), 1);
        assert!(!order.is_dirty());

        let unique_id = order.unique_id().unwrap().to_string();
        let found = repo.find_by_unique_id(&unique_id).await.unwrap().unwrap();
        assert_eq!(found.id, order.id);
        assert_eq!(found.total(), Some(Decimal::new(500, 2)));
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let repo = InMemoryOrderRepository::new();
        let mut order = Order::new("USD").unwrap();
        repo.save(&mut order).await.unwrap();

        let mut first = repo.find(order.id).await.unwrap().unwrap();
        let mut second = repo.find(order.id).await.unwrap().unwrap();

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict { expected: 1, found: 2, .. }));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = InMemoryOrderRepository::new();

        let mut mine = Order::new("USD").unwrap();
        mine.client.id = Some(7);
        let mut other = Order::new("USD").unwrap();
        other.client.id = Some(8);
        repo.save(&mut mine).await.unwrap();
        repo.save(&mut other).await.unwrap();

        assert_eq!(repo.list(None).await.unwrap().len(), 2);
        let filtered = repo.list(Some(7)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, mine.id);

        repo.delete(mine.id).await.unwrap();
        assert!(repo.find(mine.id).await.unwrap().is_none());
        assert!(matches!(repo.delete(mine.id).await, Err(RepositoryError::NotFound(_))));
    }
}
