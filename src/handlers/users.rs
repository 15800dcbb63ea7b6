// handlers/users.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::order::{OrderStatus, OrderWithPackage};
use crate::models::package::PackageCategory;
use crate::models::user::{RegisterUserRequest, UpdateUserRequest, User};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserOrdersQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Create-or-login by phone number. Users are keyed by their phone; a second
/// registration with the same number is a login.
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    if payload.phone_number.is_empty() {
        return Err(AppError::Validation("Phone number is required".to_string()));
    }

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = ?")
        .bind(&payload.phone_number)
        .fetch_optional(&state.pool)
        .await?;

    if let Some(user) = existing {
        sqlx::query("UPDATE users SET last_login = NOW(), device_id = ? WHERE id = ?")
            .bind(&payload.device_id)
            .bind(&user.id)
            .execute(&state.pool)
            .await?;

        let user = fetch_user(&state, &user.id).await?;

        return Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Welcome back!",
                "data": user,
                "isNewUser": false,
            })),
        ));
    }

    let user_id = Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO users (id, phone_number, device_id, last_login) VALUES (?, ?, ?, NOW())",
    )
    .bind(&user_id)
    .bind(&payload.phone_number)
    .bind(&payload.device_id)
    .execute(&state.pool)
    .await?;

    let user = fetch_user(&state, &user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "data": user,
            "isNewUser": true,
        })),
    ))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let user = fetch_user(&state, &id).await?;

    Ok(Json(json!({ "success": true, "data": user })))
}

pub async fn get_user_by_phone(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<Json<Value>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone_number = ?")
        .bind(&phone)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    Ok(Json(json!({ "success": true, "data": user })))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<Value>> {
    let mut sets: Vec<&str> = Vec::new();
    if payload.name.is_some() {
        sets.push("name = ?");
    }
    if payload.email.is_some() {
        sets.push("email = ?");
    }

    if sets.is_empty() {
        return Err(AppError::Validation("No fields to update".to_string()));
    }

    let sql = format!("UPDATE users SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&sql);
    if let Some(name) = &payload.name {
        q = q.bind(name);
    }
    if let Some(email) = &payload.email {
        q = q.bind(email);
    }
    q.bind(&id).execute(&state.pool).await?;

    let user = fetch_user(&state, &id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated",
        "data": user,
    })))
}

pub async fn user_orders(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UserOrdersQuery>,
) -> Result<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(AppError::Validation)?;

    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let mut sql = String::from(
        "SELECT o.*, p.name AS package_name, p.category, p.amount AS package_amount, \
                p.unit, p.ussd_code \
         FROM orders o JOIN packages p ON o.package_id = p.id \
         WHERE o.user_id = ?",
    );
    if status.is_some() {
        sql.push_str(" AND o.status = ?");
    }
    sql.push_str(" ORDER BY o.created_at DESC LIMIT ? OFFSET ?");

    let mut q = sqlx::query_as::<_, OrderWithPackage>(&sql).bind(&id);
    if let Some(status) = status {
        q = q.bind(status);
    }
    let orders = q.bind(limit).bind(offset).fetch_all(&state.pool).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = ?")
        .bind(&id)
        .fetch_one(&state.pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": orders,
        "pagination": { "total": total, "limit": limit, "offset": offset },
    })))
}

pub async fn user_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let (total_orders, completed_orders, total_spent): (i64, Option<Decimal>, Option<Decimal>) =
        sqlx::query_as(
            "SELECT COUNT(*), \
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN status = 'completed' THEN amount ELSE 0 END) \
             FROM orders WHERE user_id = ?",
        )
        .bind(&id)
        .fetch_one(&state.pool)
        .await?;

    let favorite_category = sqlx::query_as::<_, (PackageCategory, i64)>(
        "SELECT p.category, COUNT(*) AS count \
         FROM orders o JOIN packages p ON o.package_id = p.id \
         WHERE o.user_id = ? AND o.status = 'completed' \
         GROUP BY p.category ORDER BY count DESC LIMIT 1",
    )
    .bind(&id)
    .fetch_optional(&state.pool)
    .await?;

    let recent_orders = sqlx::query_as::<_, OrderWithPackage>(
        "SELECT o.*, p.name AS package_name, p.category, p.amount AS package_amount, \
                p.unit, p.ussd_code \
         FROM orders o JOIN packages p ON o.package_id = p.id \
         WHERE o.user_id = ? ORDER BY o.created_at DESC LIMIT 5",
    )
    .bind(&id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "totalOrders": total_orders,
            "completedOrders": completed_orders.and_then(|d| d.to_i64()).unwrap_or(0),
            "totalSpent": total_spent.unwrap_or(Decimal::ZERO),
            "favoriteCategory": favorite_category.map(|(category, _)| category),
            "recentOrders": recent_orders,
        },
    })))
}

async fn fetch_user(state: &AppState, id: &str) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}
