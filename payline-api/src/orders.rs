use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use payline_order::{NewOrder, Order};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub taxes_total: Decimal,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            taxes_total: order.taxes_total(),
            order,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub client_id: Option<i64>,
    pub unique_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order).get(list_orders))
        .route("/v1/orders/{id}", get(get_order).delete(delete_order))
        .route("/v1/orders/{id}/complete", post(complete_order))
        .route("/v1/orders/{id}/void", post(void_order))
        .route("/v1/orders/{id}/archive", post(archive_order))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderResponse>), AppError> {
    let order = state.orders.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /v1/orders
/// Newest first; `unique_id` looks up a single order
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = match query.unique_id {
        Some(unique_id) => state
            .orders
            .find_by_unique_id(&unique_id)
            .await?
            .into_iter()
            .collect(),
        None => state.orders.list_orders(query.client_id).await?,
    };

    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(order.into()))
}

/// DELETE /v1/orders/{id}
pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.orders.delete_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/orders/{id}/complete
pub async fn complete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    Ok(Json(state.orders.complete_order(order_id).await?.into()))
}

/// POST /v1/orders/{id}/void
pub async fn void_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    Ok(Json(state.orders.void_order(order_id).await?.into()))
}

/// POST /v1/orders/{id}/archive
pub async fn archive_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, AppError> {
    Ok(Json(state.orders.archive_order(order_id).await?.into()))
}
