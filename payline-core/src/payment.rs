use async_trait::async_trait;
use payline_shared::pii::mask_keep_last;
use payline_shared::{round_money, Masked};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// Outcome reported by the gateway for a completed call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

/// A direct charge against a card source
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub amount: Decimal,
    /// Lower-cased ISO 4217 code
    pub currency: String,
    pub source: Masked<String>,
    pub description: String,
    /// Sent with every attempt so the gateway creates at most one charge
    pub idempotency_key: Option<String>,
}

impl ChargeRequest {
    pub fn new(amount: Decimal, currency: &str, source: String, description: String) -> Self {
        Self {
            amount: round_money(amount),
            currency: currency.to_lowercase(),
            source: Masked(source),
            description,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Payload recorded on the transaction for this call
    pub fn to_request_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("amount".to_string(), Value::String(self.amount.to_string()));
        data.insert("currency".to_string(), Value::String(self.currency.clone()));
        data.insert("source".to_string(), Value::String(mask_keep_last(self.source.expose(), 4)));
        data.insert("description".to_string(), Value::String(self.description.clone()));
        if let Some(key) = &self.idempotency_key {
            data.insert("idempotency_key".to_string(), Value::String(key.clone()));
        }
        data
    }
}

/// Normalized gateway response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub id: String,
    pub status: ChargeStatus,
    pub redirect_url: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    /// Full response body, flattened to plain JSON
    pub fields: Map<String, Value>,
}

impl ChargeResponse {
    pub fn succeeded(id: impl Into<String>) -> Self {
        Self::with_status(id, ChargeStatus::Succeeded)
    }

    pub fn with_status(id: impl Into<String>, status: ChargeStatus) -> Self {
        let id = id.into();
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.clone()));
        fields.insert("status".to_string(), serde_json::to_value(status).unwrap_or(Value::Null));
        Self {
            id,
            status,
            redirect_url: None,
            failure_code: None,
            failure_message: None,
            fields,
        }
    }
}

/// Gateway failures split by whether another attempt can help
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway temporarily unavailable: {message}")]
    Retryable {
        code: Option<String>,
        message: String,
    },

    #[error("Gateway rejected the charge: {message}")]
    Terminal {
        code: Option<String>,
        message: String,
    },
}

impl GatewayError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable { code: None, message: message.into() }
    }

    pub fn terminal(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Terminal { code, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Retryable { code, .. } | Self::Terminal { code, .. } => code.as_deref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message, .. } | Self::Terminal { message, .. } => message,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name recorded on payments processed by this gateway
    fn name(&self) -> &str;

    /// Charge a card source
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;
}

/// Gateway that replays scripted outcomes, then succeeds
pub struct MockGateway {
    outcomes: Mutex<VecDeque<Result<ChargeResponse, GatewayError>>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::with_outcomes(Vec::new())
    }

    pub fn with_outcomes(outcomes: Vec<Result<ChargeResponse, GatewayError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let scripted = self.outcomes.lock().ok().and_then(|mut o| o.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => {
                tracing::debug!("Mock gateway charging {} {}", request.amount, request.currency);
                Ok(ChargeResponse::succeeded(format!("mock_ch_{}", Uuid::new_v4().simple())))
            }
        }
    }
}
