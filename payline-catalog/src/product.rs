use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Something the host application sells; supplies what an order line needs
pub trait Product: Send + Sync {
    /// Reference of the product in the host application
    fn reference_id(&self) -> String;

    /// Stock keeping unit copied onto the order line
    fn application_sku(&self) -> String;

    /// Current unit price copied onto the order line
    fn unit_price(&self) -> Decimal;
}

/// Host-owned data linked to an order line (e.g. a subscription or a ticket)
pub trait ItemData: Send + Sync {
    fn item_data_reference_id(&self) -> String;

    /// Called once the data is attached to an order line
    fn set_order_item(&mut self, item_id: Uuid);
}

/// Plain product record, as loaded from configuration or a host catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub reference: String,
    pub sku: String,
    pub name: String,
    pub unit_price: Decimal,
}

impl Product for CatalogProduct {
    fn reference_id(&self) -> String {
        self.reference.clone()
    }

    fn application_sku(&self) -> String {
        self.sku.clone()
    }

    fn unit_price(&self) -> Decimal {
        self.unit_price
    }
}

/// Resolves external product references
#[async_trait]
pub trait ProductProvider: Send + Sync {
    async fn find_product(&self, reference: &str) -> Result<Option<CatalogProduct>, ProductError>;
}

/// Product provider backed by a fixed list
#[derive(Default)]
pub struct InMemoryProductProvider {
    products: HashMap<String, CatalogProduct>,
}

impl InMemoryProductProvider {
    pub fn new(products: Vec<CatalogProduct>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.reference.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProductProvider for InMemoryProductProvider {
    async fn find_product(&self, reference: &str) -> Result<Option<CatalogProduct>, ProductError> {
        Ok(self.products.get(reference).cloned())
    }
}

/// Product-related errors
#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Product lookup failed: {0}")]
    LookupFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_provider() {
        let provider = InMemoryProductProvider::new(vec![CatalogProduct {
            reference: "plan-pro".to_string(),
            sku: "PRO-MONTHLY".to_string(),
            name: "Pro plan".to_string(),
            unit_price: Decimal::new(1999, 2),
        }]);

        let product = provider.find_product("plan-pro").await.unwrap().unwrap();
        assert_eq!(product.application_sku(), "PRO-MONTHLY");
        assert_eq!(product.unit_price(), Decimal::new(1999, 2));
        assert!(provider.find_product("missing").await.unwrap().is_none());
    }
}
