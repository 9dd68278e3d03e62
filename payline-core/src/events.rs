use async_trait::async_trait;
use payline_shared::models::events::DomainEvent;

use crate::CoreResult;

/// Destination for domain notifications
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> CoreResult<()>;
}

/// Sink that only writes events to the log
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: DomainEvent) -> CoreResult<()> {
        tracing::info!("Event {} ({}) published", event.name, event.id);
        Ok(())
    }
}
