use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use payline_order::Payment;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{id}/payments", post(create_payment))
        .route("/v1/orders/{id}/payments/{payment_id}", get(get_payment))
        .route("/v1/orders/{id}/payments/{payment_id}/confirm", post(confirm_payment))
        .route("/v1/orders/{id}/payments/{payment_id}/fail", post(fail_payment))
        .route("/v1/orders/{id}/payments/{payment_id}/cancel", post(cancel_payment))
        .route("/v1/orders/{id}/refunds", post(create_refund))
}

/// POST /v1/orders/{id}/payments
/// Charges the order total; the body carries the card `token` plus any extra data.
/// A declined charge is still a created payment, reported through its state.
pub async fn create_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(data): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state.orders.pay(order_id, data).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /v1/orders/{id}/payments/{payment_id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path((order_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orders.get_payment(order_id, payment_id).await?))
}

/// POST /v1/orders/{id}/payments/{payment_id}/confirm
/// Completes a charge left pending, e.g. after the payer returns from a 3-D Secure redirect.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path((order_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orders.confirm_payment(order_id, payment_id).await?))
}

/// POST /v1/orders/{id}/payments/{payment_id}/fail
pub async fn fail_payment(
    State(state): State<AppState>,
    Path((order_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orders.fail_payment(order_id, payment_id).await?))
}

/// POST /v1/orders/{id}/payments/{payment_id}/cancel
pub async fn cancel_payment(
    State(state): State<AppState>,
    Path((order_id, payment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orders.cancel_payment(order_id, payment_id).await?))
}

/// POST /v1/orders/{id}/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let refund = state.orders.refund(order_id, req.amount).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}
