use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use payline_order::{Item, ItemSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::orders::OrderResponse;
use crate::state::AppState;

/// Either `product_reference` or `sku` with `unit_price`
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    #[serde(flatten)]
    pub source: ItemSource,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct AddItemResponse {
    pub item: Item,
    pub order: OrderResponse,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{id}/items", post(add_item))
        .route(
            "/v1/orders/{id}/items/{item_id}",
            patch(update_item).delete(remove_item),
        )
}

/// POST /v1/orders/{id}/items
pub async fn add_item(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<AddItemResponse>), AppError> {
    let (order, item) = state.orders.add_item(order_id, req.source, req.quantity).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddItemResponse {
            item,
            order: order.into(),
        }),
    ))
}

/// PATCH /v1/orders/{id}/items/{item_id}
pub async fn update_item(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.update_item_quantity(order_id, item_id, req.quantity).await?;
    Ok(Json(order.into()))
}

/// DELETE /v1/orders/{id}/items/{item_id}
pub async fn remove_item(
    State(state): State<AppState>,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.orders.remove_item(order_id, item_id).await?;
    Ok(Json(order.into()))
}
