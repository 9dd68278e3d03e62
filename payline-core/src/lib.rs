pub mod events;
pub mod payment;
pub mod retry;

pub use events::{EventSink, LogEventSink};
pub use payment::{ChargeRequest, ChargeResponse, ChargeStatus, GatewayError, MockGateway, PaymentGateway};
pub use retry::{BackoffStrategy, RetryPolicy};

/// Failures an event sink can report
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Event delivery failed: {0}")]
    EventDelivery(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
