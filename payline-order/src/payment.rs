use chrono::{DateTime, Utc};
use payline_shared::pii::mask_sensitive_fields;
use payline_shared::round_money;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::OrderError;

/// Kind recorded on the transaction for a charge attempt
pub const KIND_PAY: &str = "pay";

const KIND_MAX_LEN: usize = 40;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Pending,
    /// Waiting on the client, e.g. a 3-D Secure redirect
    PendingUser,
    Success,
    Error,
    Cancel,
}

impl PaymentState {
    /// Waiting on the gateway or the payer
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingUser)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::PendingUser => "PENDING_USER",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Cancel => "CANCEL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(Value::String(value.to_string())).ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancel)
    }

    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::PendingUser => matches!(next, Self::Success | Self::Error | Self::Cancel),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionState {
    Pending,
    Success,
    Error,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(Value::String(value.to_string())).ok()
    }
}

/// One call to the gateway on behalf of a payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    kind: String,
    state: TransactionState,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(deserialize_with = "deserialize_masked")]
    request_data: Map<String, Value>,
    response_data: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

/// Stored form of a transaction
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub kind: String,
    pub state: TransactionState,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub request_data: Map<String, Value>,
    pub response_data: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(payment_id: Uuid, kind: &str, request_data: Map<String, Value>) -> Result<Self, OrderError> {
        let len = kind.chars().count();
        if len == 0 || len > KIND_MAX_LEN {
            return Err(OrderError::Validation(format!(
                "transaction kind must be 1 to {} characters",
                KIND_MAX_LEN
            )));
        }

        let mut tx = Self {
            id: Uuid::new_v4(),
            payment_id,
            kind: kind.to_string(),
            state: TransactionState::Pending,
            error_code: None,
            error_message: None,
            request_data: Map::new(),
            response_data: None,
            created_at: Utc::now(),
        };
        tx.set_request_data(request_data);
        Ok(tx)
    }

    /// Rebuild a stored transaction; card data is masked again on load.
    pub fn from_record(record: TransactionRecord) -> Self {
        let mut tx = Self {
            id: record.id,
            payment_id: record.payment_id,
            kind: record.kind,
            state: record.state,
            error_code: record.error_code,
            error_message: record.error_message,
            request_data: record.request_data,
            response_data: record.response_data,
            created_at: record.created_at,
        };
        tx.mask_sensitive_data();
        tx
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request_data(&self) -> &Map<String, Value> {
        &self.request_data
    }

    pub fn response_data(&self) -> Option<&Map<String, Value>> {
        self.response_data.as_ref()
    }

    pub fn set_request_data(&mut self, request_data: Map<String, Value>) {
        self.request_data = request_data;
        self.mask_sensitive_data();
    }

    pub fn mask_sensitive_data(&mut self) {
        mask_sensitive_fields(&mut self.request_data);
    }

    pub fn succeed(&mut self, response: Map<String, Value>) -> Result<(), OrderError> {
        self.transition_to(TransactionState::Success)?;
        self.response_data = Some(response);
        Ok(())
    }

    pub fn fail(&mut self, code: Option<String>, message: impl Into<String>) -> Result<(), OrderError> {
        self.transition_to(TransactionState::Error)?;
        self.error_code = code;
        self.error_message = Some(message.into());
        Ok(())
    }

    fn transition_to(&mut self, next: TransactionState) -> Result<(), OrderError> {
        if self.state != TransactionState::Pending {
            return Err(OrderError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

fn deserialize_masked<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut data = Map::<String, Value>::deserialize(deserializer)?;
    mask_sensitive_fields(&mut data);
    Ok(data)
}

/// A monetary movement against an order; refunds carry `is_refund`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    state: PaymentState,
    pub gateway_name: String,
    pub provider_transaction_reference: Option<String>,
    amount: Decimal,
    is_refund: bool,
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    transactions: Vec<Transaction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored scalar state of a payment
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub state: PaymentState,
    pub gateway_name: String,
    pub provider_transaction_reference: Option<String>,
    pub amount: Decimal,
    pub is_refund: bool,
    pub redirect_url: Option<String>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: Uuid, gateway_name: impl Into<String>, amount: Decimal) -> Result<Self, OrderError> {
        Self::build(order_id, gateway_name.into(), amount, false)
    }

    pub fn refund(order_id: Uuid, gateway_name: impl Into<String>, amount: Decimal) -> Result<Self, OrderError> {
        Self::build(order_id, gateway_name.into(), amount, true)
    }

    fn build(order_id: Uuid, gateway_name: String, amount: Decimal, is_refund: bool) -> Result<Self, OrderError> {
        let now = Utc::now();
        let mut payment = Self {
            id: Uuid::new_v4(),
            order_id,
            state: PaymentState::Pending,
            gateway_name,
            provider_transaction_reference: None,
            amount: Decimal::ZERO,
            is_refund,
            redirect_url: None,
            data: Map::new(),
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        payment.set_amount(amount)?;
        Ok(payment)
    }

    pub fn from_record(record: PaymentRecord, transactions: Vec<Transaction>) -> Self {
        Self {
            id: record.id,
            order_id: record.order_id,
            state: record.state,
            gateway_name: record.gateway_name,
            provider_transaction_reference: record.provider_transaction_reference,
            amount: record.amount,
            is_refund: record.is_refund,
            redirect_url: record.redirect_url,
            data: record.data,
            transactions,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_refund(&self) -> bool {
        self.is_refund
    }

    /// Amounts are stored rounded to cents and must stay above zero
    pub fn set_amount(&mut self, amount: Decimal) -> Result<(), OrderError> {
        let amount = round_money(amount);
        if amount <= Decimal::ZERO {
            return Err(OrderError::Validation(format!("payment amount {} must be positive", amount)));
        }
        self.amount = amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction_mut(&mut self, transaction_id: Uuid) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == transaction_id)
    }

    /// Append a transaction; the same transaction is only recorded once.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<bool, OrderError> {
        if transaction.payment_id != self.id {
            return Err(OrderError::Consistency(format!(
                "transaction belongs to payment {} not {}",
                transaction.payment_id, self.id
            )));
        }
        if self.transactions.iter().any(|t| t.id == transaction.id) {
            return Ok(false);
        }
        self.transactions.push(transaction);
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn transition_to(&mut self, next: PaymentState) -> Result<(), OrderError> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
