// services/delivery_service.rs
//
// Post-payment bundle delivery. Real carrier provisioning needs Safaricom
// Partner API access; until then a simulated backend stands in behind the
// same interface.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{error, info};

use crate::errors::{AppError, Result};
use crate::models::order::{OrderStatus, OrderWithPackage};
use crate::services::audit;

const SIMULATED_DELAY_MS: u64 = 2000;
const SIMULATED_SUCCESS_RATE: f64 = 0.95;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub order_id: String,
    pub status: OrderStatus,
    pub delivered_at: Option<chrono::DateTime<Utc>>,
    pub reference: Option<String>,
    pub error: Option<String>,
}

struct SimulationResult {
    success: bool,
    reference: Option<String>,
    error: Option<String>,
}

pub struct DeliveryService {
    pool: MySqlPool,
}

impl DeliveryService {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Deliver the purchased bundle for a paid order. Failures are recorded
    /// onto the order before the error propagates, so a calling job can
    /// decide on backoff with the order already in `delivery_failed`.
    pub async fn deliver_bundle(&self, order_id: &str) -> Result<DeliveryOutcome> {
        let order = self.fetch_order(order_id).await?;

        if order.order.status != OrderStatus::Paid {
            return Err(AppError::InvalidDeliveryState(order.order.status.to_string()));
        }

        sqlx::query("UPDATE orders SET status = ? WHERE id = ? AND status = ?")
            .bind(OrderStatus::Delivering)
            .bind(order_id)
            .bind(OrderStatus::Paid)
            .execute(&self.pool)
            .await?;

        audit::log_action(
            &self.pool,
            Some(order_id),
            None,
            "delivery_started",
            serde_json::json!({ "timestamp": Utc::now().to_rfc3339() }),
        )
        .await?;

        let result = match self.execute_delivery(&order).await {
            Ok(result) => result,
            Err(err) => {
                error!("Bundle delivery error for order {}: {}", order_id, err);
                self.record_failure(order_id, &err.to_string()).await?;
                return Err(err);
            }
        };

        if result.success {
            let reference = result.reference.unwrap_or_default();

            sqlx::query(
                "UPDATE orders SET status = ?, delivered_at = NOW(), delivery_reference = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(OrderStatus::Completed)
            .bind(&reference)
            .bind(order_id)
            .bind(OrderStatus::Delivering)
            .execute(&self.pool)
            .await?;

            audit::log_action(
                &self.pool,
                Some(order_id),
                None,
                "delivery_completed",
                serde_json::json!({ "reference": reference }),
            )
            .await?;

            info!("Bundle delivered for order {}: {}", order_id, reference);

            Ok(DeliveryOutcome {
                success: true,
                message: "Bundle delivered successfully".to_string(),
                reference: Some(reference),
                error: None,
            })
        } else {
            let error = result.error.unwrap_or_else(|| "Delivery failed".to_string());
            self.record_failure(order_id, &error).await?;

            audit::log_action(
                &self.pool,
                Some(order_id),
                None,
                "delivery_failed",
                serde_json::json!({ "error": error }),
            )
            .await?;

            Ok(DeliveryOutcome {
                success: false,
                message: "Bundle delivery failed".to_string(),
                reference: None,
                error: Some(error),
            })
        }
    }

    /// Re-attempt a failed delivery. Only valid from `delivery_failed`; the
    /// order is reset to `paid` and delivery re-invoked.
    pub async fn retry_delivery(&self, order_id: &str) -> Result<DeliveryOutcome> {
        let order = self.fetch_order(order_id).await?;

        if order.order.status != OrderStatus::DeliveryFailed {
            return Err(AppError::InvalidDeliveryState(order.order.status.to_string()));
        }

        sqlx::query(
            "UPDATE orders SET status = ?, error_message = NULL WHERE id = ? AND status = ?",
        )
        .bind(OrderStatus::Paid)
        .bind(order_id)
        .bind(OrderStatus::DeliveryFailed)
        .execute(&self.pool)
        .await?;

        self.deliver_bundle(order_id).await
    }

    pub async fn delivery_status(&self, order_id: &str) -> Result<DeliveryStatus> {
        let order = self.fetch_order(order_id).await?;

        Ok(DeliveryStatus {
            order_id: order.order.id,
            status: order.order.status,
            delivered_at: order.order.delivered_at,
            reference: order.order.delivery_reference,
            error: order.order.error_message,
        })
    }

    async fn fetch_order(&self, order_id: &str) -> Result<OrderWithPackage> {
        sqlx::query_as::<_, OrderWithPackage>(
            "SELECT o.*, p.name AS package_name, p.category, p.amount AS package_amount, \
                    p.unit, p.ussd_code \
             FROM orders o JOIN packages p ON o.package_id = p.id \
             WHERE o.id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("Order"))
    }

    async fn execute_delivery(&self, order: &OrderWithPackage) -> Result<SimulationResult> {
        // Stand-in for the carrier provisioning call (Partner API or USSD
        // gateway), with a comparable latency profile.
        tokio::time::sleep(std::time::Duration::from_millis(SIMULATED_DELAY_MS)).await;

        let success = rand::random::<f64>() < SIMULATED_SUCCESS_RATE;

        if success {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(char::from)
                .collect::<String>()
                .to_uppercase();

            info!(
                "Simulated delivery of {} to {}",
                order.package_name, order.order.phone_number
            );

            Ok(SimulationResult {
                success: true,
                reference: Some(format!("SIM-{}-{}", Utc::now().timestamp_millis(), suffix)),
                error: None,
            })
        } else {
            Ok(SimulationResult {
                success: false,
                reference: None,
                error: Some("Simulated delivery failure - network timeout".to_string()),
            })
        }
    }

    async fn record_failure(&self, order_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET status = ?, error_message = ? WHERE id = ?")
            .bind(OrderStatus::DeliveryFailed)
            .bind(error)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
