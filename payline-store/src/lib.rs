pub mod app_config;
pub mod database;
pub mod events;
pub mod order_repo;
pub mod stripe;

pub use app_config::{Config, GatewayProvider};
pub use database::DbClient;
pub use events::EventProducer;
pub use order_repo::PgOrderRepository;
pub use stripe::StripeGateway;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
