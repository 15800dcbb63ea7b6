use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle. Every status mutation goes through
/// [`OrderStatus::can_transition_to`]; terminal states never re-transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Queued,
    Processing,
    Paid,
    Delivering,
    Completed,
    DeliveryFailed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// States from which a payment may still be initiated.
    pub fn is_payable(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Queued)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending | Queued, Processing) => true,
            (Pending | Queued, Cancelled) => true,
            (Processing, Paid) => true,
            (Processing, Failed) => true,
            (Paid, Delivering) => true,
            (Delivering, Completed) => true,
            (Delivering, DeliveryFailed) => true,
            // Retry path resets a failed delivery back to paid.
            (DeliveryFailed, Paid) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Queued => "queued",
            OrderStatus::Processing => "processing",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Completed => "completed",
            OrderStatus::DeliveryFailed => "delivery_failed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "queued" => Ok(OrderStatus::Queued),
            "processing" => Ok(OrderStatus::Processing),
            "paid" => Ok(OrderStatus::Paid),
            "delivering" => Ok(OrderStatus::Delivering),
            "completed" => Ok(OrderStatus::Completed),
            "delivery_failed" => Ok(OrderStatus::DeliveryFailed),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("Invalid order status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: String,
    pub user_id: Option<String>,
    pub package_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub mpesa_receipt_number: Option<String>,
    pub delivery_reference: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Order row joined with the package it references, used by delivery and
/// order-history lookups.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderWithPackage {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub package_name: String,
    pub category: super::package::PackageCategory,
    pub package_amount: String,
    pub unit: String,
    pub ussd_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;
    use super::*;

    #[test]
    fn payable_states_accept_processing() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Processing));
        assert!(!Paid.can_transition_to(Processing));
    }

    #[test]
    fn paid_is_only_reachable_from_processing_or_retry() {
        for status in [Pending, Queued, Paid, Delivering, Completed, Failed, Cancelled] {
            assert!(!status.can_transition_to(Paid), "{status} -> paid must be rejected");
        }
        assert!(Processing.can_transition_to(Paid));
        assert!(DeliveryFailed.can_transition_to(Paid));
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                Pending, Queued, Processing, Paid, Delivering, Completed, DeliveryFailed, Failed,
                Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn delivery_retry_resets_to_paid() {
        assert!(DeliveryFailed.can_transition_to(Paid));
        assert!(!DeliveryFailed.can_transition_to(Delivering));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            Pending, Queued, Processing, Paid, Delivering, Completed, DeliveryFailed, Failed,
            Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>(), Ok(status));
        }
    }
}
