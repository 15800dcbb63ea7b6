use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment lifecycle, correlated with (but independent of) the owning
/// order's status. A payment is updated exactly once after dispatch, by the
/// callback or a fed-back query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Processing) => true,
            (Pending, Failed) => true,
            (Processing, Completed) => true,
            (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub amount: Decimal,
    pub phone_number: String,
    pub status: PaymentStatus,
    pub result_code: Option<i32>,
    pub result_description: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::PaymentStatus::*;
    use super::*;

    #[test]
    fn completed_only_from_processing() {
        assert!(Processing.can_transition_to(Completed));
        for status in [Pending, Completed, Failed, Cancelled] {
            assert!(!status.can_transition_to(Completed));
        }
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
