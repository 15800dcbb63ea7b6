use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Closed set of bundle categories sold by the shop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PackageCategory {
    Data,
    Tunukiwa,
    Sms,
    Minutes,
}

impl PackageCategory {
    pub const ALL: [PackageCategory; 4] = [
        PackageCategory::Data,
        PackageCategory::Tunukiwa,
        PackageCategory::Sms,
        PackageCategory::Minutes,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            PackageCategory::Data => "Data Deals",
            PackageCategory::Tunukiwa => "Tunukiwa",
            PackageCategory::Sms => "SMS Bundles",
            PackageCategory::Minutes => "Call Minutes",
        }
    }
}

impl fmt::Display for PackageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageCategory::Data => "data",
            PackageCategory::Tunukiwa => "tunukiwa",
            PackageCategory::Sms => "sms",
            PackageCategory::Minutes => "minutes",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PackageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(PackageCategory::Data),
            "tunukiwa" => Ok(PackageCategory::Tunukiwa),
            "sms" => Ok(PackageCategory::Sms),
            "minutes" => Ok(PackageCategory::Minutes),
            other => Err(format!(
                "Invalid category '{}'. Valid categories: data, tunukiwa, sms, minutes",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Package {
    pub id: String,
    pub category: PackageCategory,
    pub name: String,
    pub price: Decimal,
    pub amount: String,
    pub unit: String,
    pub validity: String,
    pub validity_hours: i32,
    pub ussd_code: Option<String>,
    pub description: Option<String>,
    pub is_popular: bool,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePackageRequest {
    pub name: String,
    pub category: PackageCategory,
    pub amount: String,
    pub unit: String,
    pub validity: String,
    pub validity_hours: Option<i32>,
    pub price: Decimal,
    pub ussd_code: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_popular: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePackageRequest {
    pub name: Option<String>,
    pub amount: Option<String>,
    pub unit: Option<String>,
    pub validity: Option<String>,
    pub validity_hours: Option<i32>,
    pub price: Option<Decimal>,
    pub ussd_code: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub is_popular: Option<bool>,
    pub sort_order: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for category in PackageCategory::ALL {
            assert_eq!(category.to_string().parse::<PackageCategory>(), Ok(category));
        }
    }

    #[test]
    fn unknown_category_is_rejected() {
        assert!("airtime".parse::<PackageCategory>().is_err());
    }
}
