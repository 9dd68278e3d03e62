use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Raised once a payment has been captured by the gateway
pub const PAYMENT_SUCCEEDED: &str = "payline.payment.success";

/// Raised when the gateway declines a payment or retries are exhausted
pub const PAYMENT_FAILED: &str = "payline.payment.failed";

/// Envelope for notifications sent to interested collaborators (fulfillment, receipts...)
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new<T: serde::Serialize>(name: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            occurred_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }
}
