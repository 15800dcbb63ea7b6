// services/payment_service.rs
//
// Orchestrates the STK push lifecycle: dispatch, callback reconciliation and
// active status queries. Terminal transitions are single-row conditional
// updates keyed on the `processing` status, so a replayed callback or a
// racing query reconciliation is a no-op rather than a double-apply.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{Payment, PaymentStatus};
use crate::services::audit;
use crate::services::mpesa_service::{is_valid_phone, normalize_phone, MpesaService, StkQueryResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOutcome {
    pub payment_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

pub struct PaymentService {
    pool: MySqlPool,
    mpesa: Arc<MpesaService>,
}

impl PaymentService {
    pub fn new(pool: MySqlPool, mpesa: Arc<MpesaService>) -> Self {
        Self { pool, mpesa }
    }

    /// Dispatch an STK push for an order. The payment row is persisted in
    /// `pending` before the gateway call so a crash between the two cannot
    /// silently lose the attempt.
    pub async fn initiate_push(
        &self,
        order_id: &str,
        phone_number: &str,
        amount: Decimal,
    ) -> Result<InitiateOutcome> {
        if !is_valid_phone(phone_number) {
            return Err(AppError::Validation(format!(
                "Invalid phone number: {}",
                phone_number
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("Amount must be greater than 0".to_string()));
        }

        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Order"))?;

        if !order.status.is_payable() {
            return Err(AppError::InvalidOrderState(order.status.to_string()));
        }

        // Fetch the token up front so a credential failure leaves no orphan
        // payment row. The push below reuses the cached token.
        self.mpesa.get_access_token().await?;

        let payment_id = Uuid::new_v4().to_string();
        let msisdn = normalize_phone(phone_number);

        sqlx::query(
            "INSERT INTO payments (id, order_id, amount, phone_number, status) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&payment_id)
        .bind(&order.id)
        .bind(amount)
        .bind(&msisdn)
        .bind(PaymentStatus::Pending)
        .execute(&self.pool)
        .await?;

        let reference = account_reference(&order.id);
        let push = match self
            .mpesa
            .stk_push(&msisdn, amount, &reference, "Package Purchase")
            .await
        {
            Ok(response) => response,
            Err(AppError::Mpesa(description)) => {
                // The gateway refused the submission outright. Money never
                // moved, so the order stays payable for a retry.
                self.mark_payment_failed(&payment_id, &description).await?;
                return Err(AppError::Mpesa(description));
            }
            Err(other) => return Err(other),
        };

        if push.response_code == "0" {
            sqlx::query(
                "UPDATE payments SET merchant_request_id = ?, checkout_request_id = ?, status = ? WHERE id = ?",
            )
            .bind(&push.merchant_request_id)
            .bind(&push.checkout_request_id)
            .bind(PaymentStatus::Processing)
            .bind(&payment_id)
            .execute(&self.pool)
            .await?;

            sqlx::query("UPDATE orders SET status = ? WHERE id = ? AND status IN ('pending', 'queued')")
                .bind(OrderStatus::Processing)
                .bind(&order.id)
                .execute(&self.pool)
                .await?;

            audit::log_action(
                &self.pool,
                Some(order.id.as_str()),
                Some(payment_id.as_str()),
                "stk_initiated",
                serde_json::to_value(&push).unwrap_or_default(),
            )
            .await?;

            info!("STK push initiated for order {}: {}", order.id, push.checkout_request_id);

            Ok(InitiateOutcome {
                payment_id,
                checkout_request_id: push.checkout_request_id,
                customer_message: push.customer_message,
            })
        } else {
            self.mark_payment_failed(&payment_id, &push.response_description)
                .await?;
            Err(AppError::Mpesa(push.response_description))
        }
    }

    /// Reconcile a gateway callback against the stored payment and order.
    /// Callers must acknowledge the gateway regardless of the outcome here.
    pub async fn apply_callback(&self, raw: &serde_json::Value) -> Result<()> {
        let Some(callback) = MpesaService::parse_callback(raw) else {
            warn!("Ignoring malformed M-Pesa callback");
            return Ok(());
        };

        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE checkout_request_id = ?",
        )
        .bind(&callback.checkout_request_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(payment) = payment else {
            warn!(
                "Payment not found for callback: {}",
                callback.checkout_request_id
            );
            return Ok(());
        };

        if callback.is_success() {
            if !payment.status.can_transition_to(PaymentStatus::Completed) {
                info!("Payment {} already reconciled, skipping", payment.id);
                return Ok(());
            }

            let metadata = callback.callback_metadata.as_ref();
            let receipt = metadata.and_then(|m| m.string_value("MpesaReceiptNumber"));
            let transaction_date = metadata.and_then(|m| m.string_value("TransactionDate"));

            let updated = sqlx::query(
                "UPDATE payments \
                 SET status = ?, result_code = ?, result_description = ?, \
                     mpesa_receipt_number = ?, transaction_date = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(PaymentStatus::Completed)
            .bind(callback.result_code)
            .bind(&callback.result_desc)
            .bind(&receipt)
            .bind(&transaction_date)
            .bind(&payment.id)
            .bind(PaymentStatus::Processing)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                info!("Payment {} already reconciled, skipping", payment.id);
                return Ok(());
            }

            sqlx::query(
                "UPDATE orders SET status = ?, mpesa_receipt_number = ?, paid_at = NOW() \
                 WHERE id = ? AND status = ?",
            )
            .bind(OrderStatus::Paid)
            .bind(&receipt)
            .bind(&payment.order_id)
            .bind(OrderStatus::Processing)
            .execute(&self.pool)
            .await?;

            audit::log_action(
                &self.pool,
                Some(payment.order_id.as_str()),
                Some(payment.id.as_str()),
                "payment_completed",
                raw.clone(),
            )
            .await?;

            info!(
                "Payment {} completed, receipt {:?}",
                payment.id,
                receipt.as_deref()
            );
        } else {
            if !payment.status.can_transition_to(PaymentStatus::Failed) {
                info!("Payment {} already reconciled, skipping", payment.id);
                return Ok(());
            }

            let updated = sqlx::query(
                "UPDATE payments SET status = ?, result_code = ?, result_description = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(PaymentStatus::Failed)
            .bind(callback.result_code)
            .bind(&callback.result_desc)
            .bind(&payment.id)
            .bind(PaymentStatus::Processing)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                info!("Payment {} already reconciled, skipping", payment.id);
                return Ok(());
            }

            sqlx::query(
                "UPDATE orders SET status = ?, error_message = ? WHERE id = ? AND status = ?",
            )
            .bind(OrderStatus::Failed)
            .bind(&callback.result_desc)
            .bind(&payment.order_id)
            .bind(OrderStatus::Processing)
            .execute(&self.pool)
            .await?;

            audit::log_action(
                &self.pool,
                Some(payment.order_id.as_str()),
                Some(payment.id.as_str()),
                "payment_failed",
                raw.clone(),
            )
            .await?;

            info!(
                "Payment {} failed: {} ({})",
                payment.id, callback.result_desc, callback.result_code
            );
        }

        Ok(())
    }

    /// Active poll against the gateway for a payment whose callback is
    /// delayed or lost. Stored state is not mutated here.
    pub async fn query_status(&self, payment_id: &str) -> Result<StkQueryResponse> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = ?")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Payment"))?;

        let checkout_request_id = payment
            .checkout_request_id
            .as_deref()
            .ok_or(AppError::NoCheckoutId)?;

        self.mpesa.query_transaction(checkout_request_id).await
    }

    async fn mark_payment_failed(&self, payment_id: &str, description: &str) -> Result<()> {
        sqlx::query("UPDATE payments SET status = ?, result_description = ? WHERE id = ?")
            .bind(PaymentStatus::Failed)
            .bind(description)
            .bind(payment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Gateway account reference, `BINGWA-` plus the first order-id segment,
/// bounded by the gateway's 12-character limit.
fn account_reference(order_id: &str) -> String {
    let prefix: String = order_id.chars().take(8).collect();
    let mut reference = format!("BINGWA-{}", prefix.to_uppercase());
    reference.truncate(12);
    reference
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_reference_respects_gateway_limit() {
        let reference = account_reference("d0f1e2a3-4b5c-6d7e-8f90-000000000000");
        assert_eq!(reference, "BINGWA-D0F1E");
        assert_eq!(reference.len(), 12);
        assert_eq!(account_reference("ab"), "BINGWA-AB");
    }

    // Pure model of the reconciliation flow: the same conditional-transition
    // guards the SQL applies, exercised over every operation interleaving.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct LifecycleState {
        order: OrderStatus,
        payment: PaymentStatus,
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Initiate,
        CallbackSuccess,
        CallbackFailure,
        QueryReconcileSuccess,
    }

    fn apply(state: LifecycleState, op: Op) -> LifecycleState {
        let mut next = state;
        match op {
            Op::Initiate => {
                if state.order.is_payable() && state.payment == PaymentStatus::Pending {
                    next.payment = PaymentStatus::Processing;
                    next.order = OrderStatus::Processing;
                }
            }
            Op::CallbackSuccess | Op::QueryReconcileSuccess => {
                if state.payment == PaymentStatus::Processing {
                    next.payment = PaymentStatus::Completed;
                    if state.order == OrderStatus::Processing {
                        next.order = OrderStatus::Paid;
                    }
                }
            }
            Op::CallbackFailure => {
                if state.payment == PaymentStatus::Processing {
                    next.payment = PaymentStatus::Failed;
                    if state.order == OrderStatus::Processing {
                        next.order = OrderStatus::Failed;
                    }
                }
            }
        }
        next
    }

    fn consistent(state: LifecycleState) -> bool {
        match state.payment {
            PaymentStatus::Completed => matches!(
                state.order,
                OrderStatus::Paid
                    | OrderStatus::Delivering
                    | OrderStatus::Completed
                    | OrderStatus::DeliveryFailed
            ),
            PaymentStatus::Failed => !matches!(
                state.order,
                OrderStatus::Paid
                    | OrderStatus::Delivering
                    | OrderStatus::Completed
                    | OrderStatus::DeliveryFailed
            ),
            PaymentStatus::Processing => state.order == OrderStatus::Processing,
            PaymentStatus::Pending | PaymentStatus::Cancelled => true,
        }
    }

    #[test]
    fn reconciliation_never_leaves_contradictory_state() {
        let ops = [
            Op::Initiate,
            Op::CallbackSuccess,
            Op::CallbackFailure,
            Op::QueryReconcileSuccess,
        ];

        let start = LifecycleState {
            order: OrderStatus::Queued,
            payment: PaymentStatus::Pending,
        };

        // Every sequence of up to four operations, including replays and
        // query/callback races collapsed to their serialized interleavings.
        let mut frontier = vec![start];
        for _ in 0..4 {
            let mut next_frontier = Vec::new();
            for state in &frontier {
                for op in ops {
                    let next = apply(*state, op);
                    assert!(
                        consistent(next),
                        "inconsistent state {:?} after {:?} from {:?}",
                        next,
                        op,
                        state
                    );
                    next_frontier.push(next);
                }
            }
            frontier = next_frontier;
        }
    }

    #[test]
    fn replayed_success_callback_is_a_noop() {
        let start = LifecycleState {
            order: OrderStatus::Queued,
            payment: PaymentStatus::Pending,
        };
        let after_push = apply(start, Op::Initiate);
        let first = apply(after_push, Op::CallbackSuccess);
        let second = apply(first, Op::CallbackSuccess);

        assert_eq!(first.payment, PaymentStatus::Completed);
        assert_eq!(first.order, OrderStatus::Paid);
        assert_eq!(second, first);
    }

    #[test]
    fn cancelled_push_fails_payment_and_order() {
        let start = LifecycleState {
            order: OrderStatus::Queued,
            payment: PaymentStatus::Pending,
        };
        let after_push = apply(start, Op::Initiate);
        let after_cancel = apply(after_push, Op::CallbackFailure);

        assert_eq!(after_cancel.payment, PaymentStatus::Failed);
        assert_eq!(after_cancel.order, OrderStatus::Failed);

        // A late success for the same push cannot resurrect the payment.
        let after_late_success = apply(after_cancel, Op::QueryReconcileSuccess);
        assert_eq!(after_late_success, after_cancel);
    }
}
