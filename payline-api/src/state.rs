use payline_catalog::InMemoryProductProvider;
use payline_core::PaymentGateway;
use payline_order::{OrderManager, OrderRepository, PaymentOrchestrator};
use payline_store::{Config, DbClient, EventProducer};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub events: EventProducer,
    /// Present when orders are stored in Postgres
    pub db: Option<DbClient>,
}

impl AppState {
    /// Wire the order manager from configuration and the chosen collaborators
    pub fn new(
        config: &Config,
        repository: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventProducer,
        db: Option<DbClient>,
    ) -> Self {
        let orchestrator = PaymentOrchestrator::new(
            gateway,
            Arc::new(events.clone()),
            repository.clone(),
            config.payments.clone(),
        )
        .with_description(config.gateway.description.clone());

        let orders = OrderManager::new(
            repository,
            Arc::new(config.tax_registry()),
            Arc::new(InMemoryProductProvider::new(config.products.clone())),
            orchestrator,
        );

        Self {
            orders: Arc::new(orders),
            events,
            db,
        }
    }
}
