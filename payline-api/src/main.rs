use anyhow::Context;
use payline_api::{app, AppState};
use payline_core::{MockGateway, PaymentGateway};
use payline_order::{InMemoryOrderRepository, OrderRepository};
use payline_store::{Config, DbClient, EventProducer, GatewayProvider, PgOrderRepository, StripeGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payline_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Payline API on port {}", config.server.port);

    let db = DbClient::from_config(&config.database)
        .await
        .context("Failed to connect to Postgres")?;

    let repository: Arc<dyn OrderRepository> = match &db {
        Some(db) => Arc::new(PgOrderRepository::new(db.pool.clone())),
        None => {
            tracing::warn!("No database url configured; orders are kept in memory");
            Arc::new(InMemoryOrderRepository::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> = match config.gateway.provider {
        GatewayProvider::Stripe => Arc::new(StripeGateway::from_config(&config.gateway)?),
        GatewayProvider::Mock => {
            tracing::warn!("Using the mock payment gateway; no card is charged");
            Arc::new(MockGateway::new())
        }
    };

    let events = EventProducer::default();
    let mut audit = events.subscribe();
    tokio::spawn(async move {
        loop {
            match audit.recv().await {
                Ok(event) => tracing::info!("Event {} {} {}", event.name, event.id, event.payload["id"]),
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Event log skipped {} event(s)", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app_state = AppState::new(&config, repository, gateway, events, db);
    let app = app(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
