// handlers/packages.rs
use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{AppError, Result};
use crate::models::package::{CreatePackageRequest, Package, PackageCategory, UpdatePackageRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PackageListQuery {
    pub category: Option<String>,
    pub active_only: Option<String>,
}

pub async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<PackageListQuery>,
) -> Result<Json<Value>> {
    let active_only = query.active_only.as_deref().unwrap_or("true") == "true";
    let category = query
        .category
        .as_deref()
        .map(|c| c.parse::<PackageCategory>())
        .transpose()
        .map_err(AppError::Validation)?;

    let mut sql = String::from("SELECT * FROM packages WHERE 1=1");
    if active_only {
        sql.push_str(" AND is_active = TRUE");
    }
    if category.is_some() {
        sql.push_str(" AND category = ?");
    }
    sql.push_str(" ORDER BY category, sort_order, price");

    let mut q = sqlx::query_as::<_, Package>(&sql);
    if let Some(category) = category {
        q = q.bind(category);
    }
    let packages = q.fetch_all(&state.pool).await?;

    let mut grouped: BTreeMap<String, Vec<&Package>> = BTreeMap::new();
    for package in &packages {
        grouped.entry(package.category.to_string()).or_default().push(package);
    }

    Ok(Json(json!({
        "success": true,
        "data": {
            "packages": packages,
            "grouped": grouped,
            "total": packages.len(),
        },
    })))
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Value>> {
    let counts = sqlx::query_as::<_, (PackageCategory, i64)>(
        "SELECT category, COUNT(*) FROM packages WHERE is_active = TRUE GROUP BY category",
    )
    .fetch_all(&state.pool)
    .await?;

    let categories: Vec<Value> = PackageCategory::ALL
        .iter()
        .map(|category| {
            let count = counts
                .iter()
                .find(|(c, _)| c == category)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            json!({
                "id": category.to_string(),
                "name": category.display_name(),
                "count": count,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "data": categories })))
}

pub async fn featured_packages(State(state): State<AppState>) -> Result<Json<Value>> {
    let packages = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE is_active = TRUE AND is_popular = TRUE \
         ORDER BY sort_order LIMIT 6",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({ "success": true, "data": packages })))
}

pub async fn get_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let package = fetch_package(&state, &id).await?;

    Ok(Json(json!({ "success": true, "data": package })))
}

pub async fn packages_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Value>> {
    let category = category
        .parse::<PackageCategory>()
        .map_err(AppError::Validation)?;

    let packages = sqlx::query_as::<_, Package>(
        "SELECT * FROM packages WHERE category = ? AND is_active = TRUE \
         ORDER BY sort_order, price",
    )
    .bind(category)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": packages,
        "total": packages.len(),
    })))
}

pub async fn create_package(
    State(state): State<AppState>,
    Json(payload): Json<CreatePackageRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    if payload.name.is_empty() || payload.amount.is_empty() || payload.unit.is_empty() {
        return Err(AppError::Validation("Missing required fields".to_string()));
    }

    let id = format!("{}_{}", payload.category, Utc::now().timestamp_millis());

    sqlx::query(
        "INSERT INTO packages \
         (id, name, category, amount, unit, validity, validity_hours, price, ussd_code, description, is_popular) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&payload.name)
    .bind(payload.category)
    .bind(&payload.amount)
    .bind(&payload.unit)
    .bind(&payload.validity)
    .bind(payload.validity_hours.unwrap_or(24))
    .bind(payload.price)
    .bind(&payload.ussd_code)
    .bind(&payload.description)
    .bind(payload.is_popular)
    .execute(&state.pool)
    .await?;

    let package = fetch_package(&state, &id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Package created successfully",
            "data": package,
        })),
    ))
}

pub async fn update_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdatePackageRequest>,
) -> Result<Json<Value>> {
    let mut sets: Vec<&str> = Vec::new();
    if payload.name.is_some() {
        sets.push("name = ?");
    }
    if payload.amount.is_some() {
        sets.push("amount = ?");
    }
    if payload.unit.is_some() {
        sets.push("unit = ?");
    }
    if payload.validity.is_some() {
        sets.push("validity = ?");
    }
    if payload.validity_hours.is_some() {
        sets.push("validity_hours = ?");
    }
    if payload.price.is_some() {
        sets.push("price = ?");
    }
    if payload.ussd_code.is_some() {
        sets.push("ussd_code = ?");
    }
    if payload.description.is_some() {
        sets.push("description = ?");
    }
    if payload.is_active.is_some() {
        sets.push("is_active = ?");
    }
    if payload.is_popular.is_some() {
        sets.push("is_popular = ?");
    }
    if payload.sort_order.is_some() {
        sets.push("sort_order = ?");
    }

    if sets.is_empty() {
        return Err(AppError::Validation("No valid fields to update".to_string()));
    }

    let sql = format!("UPDATE packages SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&sql);
    if let Some(v) = &payload.name {
        q = q.bind(v);
    }
    if let Some(v) = &payload.amount {
        q = q.bind(v);
    }
    if let Some(v) = &payload.unit {
        q = q.bind(v);
    }
    if let Some(v) = &payload.validity {
        q = q.bind(v);
    }
    if let Some(v) = payload.validity_hours {
        q = q.bind(v);
    }
    if let Some(v) = payload.price {
        q = q.bind(v);
    }
    if let Some(v) = &payload.ussd_code {
        q = q.bind(v);
    }
    if let Some(v) = &payload.description {
        q = q.bind(v);
    }
    if let Some(v) = payload.is_active {
        q = q.bind(v);
    }
    if let Some(v) = payload.is_popular {
        q = q.bind(v);
    }
    if let Some(v) = payload.sort_order {
        q = q.bind(v);
    }
    q.bind(&id).execute(&state.pool).await?;

    let package = fetch_package(&state, &id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Package updated successfully",
        "data": package,
    })))
}

/// Soft delete: packages are reference data, so deletion only clears the
/// active flag.
pub async fn delete_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let affected = sqlx::query("UPDATE packages SET is_active = FALSE WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(AppError::NotFound("Package"));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Package deleted successfully",
    })))
}

async fn fetch_package(state: &AppState, id: &str) -> Result<Package> {
    sqlx::query_as::<_, Package>("SELECT * FROM packages WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Package"))
}
