// services/audit.rs
//
// Append-only transaction log. Entries are never updated or deleted; they
// exist so a payment dispute can be replayed from what the gateway actually
// sent us.

use sqlx::MySqlPool;

use crate::errors::Result;

pub async fn log_action(
    pool: &MySqlPool,
    order_id: Option<&str>,
    payment_id: Option<&str>,
    action: &str,
    details: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO transaction_logs (order_id, payment_id, action, details) VALUES (?, ?, ?, ?)",
    )
    .bind(order_id)
    .bind(payment_id)
    .bind(action)
    .bind(sqlx::types::Json(details))
    .execute(pool)
    .await?;

    Ok(())
}
