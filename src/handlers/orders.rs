// handlers/orders.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::order::{Order, OrderStatus};
use crate::models::package::Package;
use crate::services::audit;
use crate::services::mpesa_service::{is_valid_phone, normalize_phone};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "packageId is required"))]
    pub package_id: String,
    #[validate(length(min = 1, message = "phoneNumber is required"))]
    pub phone_number: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub phone: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub status: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrdersRequest {
    pub orders: Vec<SyncOrderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOrderItem {
    pub id: Option<String>,
    pub package_id: String,
    pub phone_number: String,
    pub created_at: Option<DateTime<Utc>>,
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(AppError::Validation)?;

    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut sql = String::from("SELECT * FROM orders WHERE 1=1");
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if query.phone.is_some() {
        sql.push_str(" AND phone_number = ?");
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

    let mut q = sqlx::query_as::<_, Order>(&sql);
    if let Some(status) = status {
        q = q.bind(status);
    }
    if let Some(phone) = &query.phone {
        q = q.bind(phone);
    }
    let orders = q.bind(limit).bind(offset).fetch_all(&state.pool).await?;

    Ok(Json(json!({
        "success": true,
        "data": orders,
        "pagination": { "limit": limit, "offset": offset },
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let order = fetch_order(&state, &id).await?;

    Ok(Json(json!({ "success": true, "data": order })))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    payload.validate()?;

    if !is_valid_phone(&payload.phone_number) {
        return Err(AppError::Validation(format!(
            "Invalid phone number: {}",
            payload.phone_number
        )));
    }
    let phone_number = normalize_phone(&payload.phone_number);

    let package = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE id = ? AND is_active = TRUE",
    )
    .bind(&payload.package_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::NotFound("Package"))?;

    let order_id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO orders (id, user_id, package_id, phone_number, amount, status) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&order_id)
    .bind(&payload.user_id)
    .bind(&package.id)
    .bind(&phone_number)
    .bind(package.price)
    .bind(OrderStatus::Queued)
    .execute(&state.pool)
    .await?;

    audit::log_action(
        &state.pool,
        Some(order_id.as_str()),
        None,
        "order_created",
        json!({
            "packageId": package.id,
            "phoneNumber": phone_number,
            "amount": package.price,
        }),
    )
    .await?;

    let order = fetch_order(&state, &order_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": order,
            "message": "Order created successfully",
        })),
    ))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<Json<Value>> {
    let order = fetch_order(&state, &id).await?;

    let next_status = payload
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(AppError::Validation)?;

    if let Some(next) = next_status {
        if !order.status.can_transition_to(next) {
            return Err(AppError::InvalidOrderState(format!(
                "{} cannot transition to {}",
                order.status, next
            )));
        }
    }

    let mut sets: Vec<&str> = Vec::new();
    if let Some(next) = next_status {
        sets.push("status = ?");
        if next == OrderStatus::Paid {
            sets.push("paid_at = NOW()");
        } else if next == OrderStatus::Completed {
            sets.push("delivered_at = NOW()");
        }
    }
    if payload.mpesa_receipt_number.is_some() {
        sets.push("mpesa_receipt_number = ?");
    }
    if payload.error_message.is_some() {
        sets.push("error_message = ?");
    }

    if sets.is_empty() {
        return Err(AppError::Validation("No updates provided".to_string()));
    }

    let sql = format!("UPDATE orders SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&sql);
    if let Some(next) = next_status {
        q = q.bind(next);
    }
    if let Some(receipt) = &payload.mpesa_receipt_number {
        q = q.bind(receipt);
    }
    if let Some(error_message) = &payload.error_message {
        q = q.bind(error_message);
    }
    q.bind(&id).execute(&state.pool).await?;

    let order = fetch_order(&state, &id).await?;

    Ok(Json(json!({ "success": true, "data": order })))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let order = fetch_order(&state, &id).await?;

    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(AppError::InvalidOrderState(order.status.to_string()));
    }

    sqlx::query("UPDATE orders SET status = ? WHERE id = ?")
        .bind(OrderStatus::Cancelled)
        .bind(&id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Order cancelled successfully",
    })))
}

/// Batch upload of orders queued offline on the client. Each item succeeds
/// or fails independently.
pub async fn sync_orders(
    State(state): State<AppState>,
    Json(payload): Json<SyncOrdersRequest>,
) -> Result<Json<Value>> {
    if payload.orders.is_empty() {
        return Err(AppError::Validation("No orders to sync".to_string()));
    }

    let mut results: Vec<Value> = Vec::new();

    for item in &payload.orders {
        let package = match sqlx::query_as::<_, Package>("SELECT * FROM packages WHERE id = ?")
            .bind(&item.package_id)
            .fetch_optional(&state.pool)
            .await
        {
            Ok(Some(package)) => package,
            Ok(None) => {
                results.push(json!({
                    "localId": item.id,
                    "status": "failed",
                    "error": "Package not found",
                }));
                continue;
            }
            Err(err) => {
                results.push(json!({
                    "localId": item.id,
                    "status": "failed",
                    "error": err.to_string(),
                }));
                continue;
            }
        };

        let order_id = Uuid::new_v4().to_string();
        let created_at = item.created_at.unwrap_or_else(Utc::now);

        let inserted = sqlx::query(
            "INSERT INTO orders (id, package_id, phone_number, amount, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&order_id)
        .bind(&item.package_id)
        .bind(&item.phone_number)
        .bind(package.price)
        .bind(OrderStatus::Queued)
        .bind(created_at)
        .execute(&state.pool)
        .await;

        match inserted {
            Ok(_) => results.push(json!({
                "localId": item.id,
                "serverId": order_id,
                "status": "synced",
            })),
            Err(err) => results.push(json!({
                "localId": item.id,
                "status": "failed",
                "error": err.to_string(),
            })),
        }
    }

    let synced = results.iter().filter(|r| r["status"] == "synced").count();

    Ok(Json(json!({
        "success": true,
        "data": results,
        "message": format!("Synced {} of {} orders", synced, payload.orders.len()),
    })))
}

async fn fetch_order(state: &AppState, id: &str) -> Result<Order> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Order"))
}
