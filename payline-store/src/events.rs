use async_trait::async_trait;
use payline_core::{CoreResult, EventSink};
use payline_shared::models::events::DomainEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fans domain events out to in-process subscribers
#[derive(Clone)]
pub struct EventProducer {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventProducer {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventProducer {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl EventSink for EventProducer {
    async fn publish(&self, event: DomainEvent) -> CoreResult<()> {
        let name = event.name.clone();
        match self.sender.send(event) {
            Ok(receivers) => info!("Sent {} to {} subscriber(s)", name, receivers),
            // No subscriber is not a failure; the event is simply dropped
            Err(_) => debug!("No subscribers for {}", name),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payline_shared::models::events::PAYMENT_SUCCEEDED;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let producer = EventProducer::default();
        let mut rx = producer.subscribe();

        let event = DomainEvent::new(PAYMENT_SUCCEEDED, &json!({"id": "pay_1"})).unwrap();
        producer.publish(event.clone()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, event.id);
        assert_eq!(received.payload["id"], "pay_1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let producer = EventProducer::new(4);
        let event = DomainEvent::new(PAYMENT_SUCCEEDED, &json!({})).unwrap();
        assert!(producer.publish(event).await.is_ok());
    }
}
