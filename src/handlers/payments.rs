// handlers/payments.rs
use axum::{
    extract::{Path, State},
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::order::Order;
use crate::models::payment::Payment;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[validate(length(min = 1, message = "orderId is required"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "phoneNumber is required"))]
    pub phone_number: String,
    pub amount: Decimal,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;

    let outcome = state
        .payments
        .initiate_push(&payload.order_id, &payload.phone_number, payload.amount)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "STK Push sent successfully. Check your phone.",
        "data": outcome,
    })))
}

/// Gateway-facing webhook. The gateway retries on anything but a success
/// envelope, so every internal outcome - including undecodable payloads -
/// is swallowed here and acknowledged.
pub async fn mpesa_callback(State(state): State<AppState>, body: String) -> Json<Value> {
    let ack = Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }));

    let raw: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!("Undecodable M-Pesa callback body: {}", err);
            return ack;
        }
    };

    info!("Received M-Pesa callback");

    if let Err(err) = state.payments.apply_callback(&raw).await {
        error!("Callback reconciliation error: {}", err);
    }

    ack
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let payment = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE id = ? OR checkout_request_id = ?",
    )
    .bind(&id)
    .bind(&id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound("Payment"))?;

    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
        .bind(&payment.order_id)
        .fetch_optional(&state.pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "payment": payment, "order": order },
    })))
}

pub async fn query_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let result = state.payments.query_status(&id).await?;

    Ok(Json(json!({ "success": true, "data": result })))
}
