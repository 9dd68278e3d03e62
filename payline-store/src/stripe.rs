use async_trait::async_trait;
use payline_core::{ChargeRequest, ChargeResponse, ChargeStatus, GatewayError, PaymentGateway};
use payline_shared::to_minor_units;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::app_config::GatewayConfig;
use crate::StoreError;

const CHARGES_PATH: &str = "/v1/charges";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Card gateway speaking the Stripe charges API
pub struct StripeGateway {
    api_key: String,
    base_url: String,
    client: Client,
}

impl StripeGateway {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, StoreError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| StoreError::InvalidConfig("gateway.api_key is required for stripe".to_string()))?;
        Self::new(api_key, &config.base_url, Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let idempotent = request.idempotency_key.is_some();
        let response = self
            .charge_request(request)?
            .send()
            .await
            .map_err(|e| classify_transport_error(e, idempotent))?;

        let status = response.status();
        match response.bytes().await {
            Ok(body) => interpret_response(status, &body),
            Err(e) if idempotent && !status.is_success() => Err(GatewayError::retryable(e.to_string())),
            Err(e) => Err(GatewayError::terminal(None, format!("unreadable gateway response: {}", e))),
        }
    }
}

impl StripeGateway {
    fn charge_request(&self, request: &ChargeRequest) -> Result<RequestBuilder, GatewayError> {
        let amount = to_minor_units(request.amount)
            .ok_or_else(|| GatewayError::terminal(None, format!("amount {} cannot be charged", request.amount)))?;

        let form = [
            ("amount", amount.to_string()),
            ("currency", request.currency.clone()),
            ("source", request.source.expose().clone()),
            ("description", request.description.clone()),
        ];

        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, CHARGES_PATH))
            .bearer_auth(&self.api_key)
            .form(&form);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        Ok(builder)
    }
}

/// A 2xx body that cannot be read may still stand for a created charge, so it is never retried.
fn interpret_response(status: StatusCode, body: &[u8]) -> Result<ChargeResponse, GatewayError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(body) if status.is_success() => parse_charge(body),
        Ok(body) => Err(classify_error_response(status, &body)),
        Err(e) if status.is_success() => Err(GatewayError::terminal(
            Some("unreadable_response".to_string()),
            format!("unreadable gateway response: {}", e),
        )),
        Err(_) => Err(classify_error_response(status, &Value::Null)),
    }
}

/// A timed out request may have reached the gateway; it is only resent under an idempotency key.
fn classify_transport_error(error: reqwest::Error, idempotent: bool) -> GatewayError {
    if error.is_connect() || (error.is_timeout() && idempotent) {
        GatewayError::retryable(error.to_string())
    } else {
        GatewayError::terminal(None, error.to_string())
    }
}

/// Rate limits and server errors can be retried; anything else is the caller's problem.
fn classify_error_response(status: StatusCode, body: &Value) -> GatewayError {
    let error = &body["error"];
    let code = error["decline_code"]
        .as_str()
        .or_else(|| error["code"].as_str())
        .map(str::to_string);
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("gateway answered {}", status));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Retryable { code, message }
    } else {
        GatewayError::Terminal { code, message }
    }
}

fn parse_charge(body: Value) -> Result<ChargeResponse, GatewayError> {
    let Value::Object(fields) = body else {
        return Err(GatewayError::terminal(None, "gateway response is not an object"));
    };

    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::terminal(None, "gateway response has no charge id"))?
        .to_string();

    let status = match fields.get("status").and_then(Value::as_str) {
        Some("succeeded") => ChargeStatus::Succeeded,
        Some("pending") => ChargeStatus::Pending,
        Some("failed") => ChargeStatus::Failed,
        other => {
            return Err(GatewayError::terminal(
                None,
                format!("unknown charge status {:?}", other.unwrap_or("")),
            ))
        }
    };

    Ok(ChargeResponse {
        id,
        status,
        redirect_url: redirect_url(&fields),
        failure_code: text(&fields, "failure_code"),
        failure_message: text(&fields, "failure_message"),
        fields,
    })
}

fn redirect_url(fields: &Map<String, Value>) -> Option<String> {
    fields
        .get("next_action")
        .and_then(|a| a.pointer("/redirect_to_url/url"))
        .or_else(|| fields.get("source").and_then(|s| s.pointer("/redirect/url")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}
