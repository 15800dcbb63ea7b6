// handlers/delivery.rs
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};

use crate::errors::Result;
use crate::services::delivery_service::DeliveryOutcome;
use crate::state::AppState;

pub async fn trigger_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<DeliveryOutcome>> {
    let outcome = state.delivery.deliver_bundle(&order_id).await?;

    Ok(Json(outcome))
}

pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<DeliveryOutcome>> {
    let outcome = state.delivery.retry_delivery(&order_id).await?;

    Ok(Json(outcome))
}

pub async fn delivery_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Value>> {
    let status = state.delivery.delivery_status(&order_id).await?;

    Ok(Json(json!({ "success": true, "data": status })))
}
