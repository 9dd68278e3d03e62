use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use payline_catalog::{TaxConfigurationInTime, TaxError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::orders::OrderResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AttachTaxRequest {
    pub configuration_name: String,
}

#[derive(Debug, Serialize)]
pub struct TaxConfigurationResponse {
    pub configuration_name: String,
    pub tax_name: String,
    pub tax_number: String,
    pub evaluated_at: DateTime<Utc>,
    /// Most applicable first
    pub rates: Vec<TaxConfigurationInTime>,
    pub effective_rate: Option<TaxConfigurationInTime>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{id}/taxes", post(attach_tax))
        .route("/v1/tax-configurations/{name}", get(get_tax_configuration))
}

/// POST /v1/orders/{id}/taxes
pub async fn attach_tax(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<AttachTaxRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.attach_tax(order_id, &req.configuration_name).await?;
    Ok(Json(order.into()))
}

/// GET /v1/tax-configurations/{name}
pub async fn get_tax_configuration(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TaxConfigurationResponse>, AppError> {
    let configuration = state
        .orders
        .tax_registry()
        .configuration(&name)
        .map_err(|e: TaxError| AppError::NotFoundError(e.to_string()))?;

    let now = Utc::now();
    Ok(Json(TaxConfigurationResponse {
        configuration_name: configuration.configuration_name.clone(),
        tax_name: configuration.tax_name.clone(),
        tax_number: configuration.tax_number.clone(),
        evaluated_at: now,
        rates: configuration.sorted_rates(now).into_iter().cloned().collect(),
        effective_rate: configuration.effective_rate(now).cloned(),
    }))
}
