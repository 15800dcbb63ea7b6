// services/mpesa_service.rs
//
// Safaricom Daraja client: OAuth token exchange with in-memory caching,
// STK push dispatch, transaction status queries and callback parsing.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Refresh this long before the gateway's stated TTL so a token never
/// expires mid-flight.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

const ACCOUNT_REFERENCE_MAX: usize = 12;
const TRANSACTION_DESC_MAX: usize = 13;

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: u64,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

/// Raw result of an active status query. Fed back to the caller untouched;
/// acting on it goes through the same reconciliation as the callback path.
#[derive(Debug, Serialize, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResultCode")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

impl StkCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    /// Item order is not guaranteed by the gateway; always look up by name.
    pub fn value(&self, name: &str) -> Option<&serde_json::Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }

    pub fn string_value(&self, name: &str) -> Option<String> {
        self.value(name).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// Normalize a subscriber number to the gateway's `254XXXXXXXXX` format.
/// Idempotent: already-normalized numbers pass through unchanged.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    if let Some(rest) = cleaned.strip_prefix("+254") {
        format!("254{}", rest)
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("254{}", rest)
    } else if cleaned.starts_with('7') || cleaned.starts_with('1') {
        format!("254{}", cleaned)
    } else {
        cleaned
    }
}

/// A number is dispatchable iff it normalizes to `254[17]` followed by
/// exactly eight more digits.
pub fn is_valid_phone(phone: &str) -> bool {
    let normalized = normalize_phone(phone);
    let bytes = normalized.as_bytes();

    bytes.len() == 12
        && normalized.starts_with("254")
        && matches!(bytes[3], b'1' | b'7')
        && bytes[4..].iter().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MpesaService {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.mpesa_short_code, self.config.mpesa_passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some(cached) = cached.as_ref() {
                if cached.expires_at > Utc::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _, _) = self.config.get_mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await
            .map_err(|e| AppError::Credential(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::Credential(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::Credential(e.to_string()))?;

        let ttl = auth_response.expires_in.parse::<i64>().unwrap_or(3600);
        let expires_at =
            Utc::now() + chrono::Duration::seconds((ttl - TOKEN_EXPIRY_MARGIN_SECS).max(0));

        {
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some(CachedToken {
                token: auth_response.access_token.clone(),
                expires_at,
            });
        }

        info!("M-Pesa access token obtained");
        Ok(auth_response.access_token)
    }

    /// Dispatch an STK push. The amount is rounded up to the next whole
    /// shilling; the gateway rejects fractional amounts.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: Decimal,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        let whole_amount = amount
            .ceil()
            .to_u64()
            .ok_or_else(|| AppError::Validation("Amount out of range".to_string()))?;

        let access_token = self.get_access_token().await?;
        let formatted_phone = normalize_phone(phone_number);
        let timestamp = Self::timestamp();
        let password = self.generate_password(&timestamp);

        let (_, stk_url, _) = self.config.get_mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: whole_amount,
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: truncate(account_reference, ACCOUNT_REFERENCE_MAX),
            transaction_desc: truncate(transaction_desc, TRANSACTION_DESC_MAX),
        };

        info!(
            "STK push for {} - KSh {}",
            stk_request.phone_number, stk_request.amount
        );

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK push rejected: {} - {}", status, body);
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| format!("Failed to initiate STK push: {}", status));
            return Err(AppError::Mpesa(message));
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!("STK push submitted: {}", stk_response.merchant_request_id);
        Ok(stk_response)
    }

    /// Active poll for the outcome of a dispatched push. Read-through to the
    /// gateway; stored state is not touched here.
    pub async fn query_transaction(&self, checkout_request_id: &str) -> Result<StkQueryResponse> {
        let access_token = self.get_access_token().await?;
        let timestamp = Self::timestamp();
        let password = self.generate_password(&timestamp);

        let (_, _, query_url) = self.config.get_mpesa_urls();

        let query_request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(&query_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&query_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("STK query failed: {} - {}", status, body);
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("errorMessage").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| format!("Failed to query transaction: {}", status));
            return Err(AppError::Mpesa(message));
        }

        let query_response: StkQueryResponse = response.json().await?;
        Ok(query_response)
    }

    /// Parse the gateway's nested callback envelope. Returns `None` for
    /// malformed or foreign payloads; the receiver acknowledges those anyway.
    pub fn parse_callback(raw: &serde_json::Value) -> Option<StkCallback> {
        serde_json::from_value::<CallbackEnvelope>(raw.clone())
            .ok()
            .map(|envelope| envelope.body.stk_callback)
    }
}

fn truncate(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> AppConfig {
        AppConfig {
            mpesa_consumer_key: "key".to_string(),
            mpesa_consumer_secret: "secret".to_string(),
            mpesa_short_code: "174379".to_string(),
            mpesa_passkey: "passkey".to_string(),
            mpesa_callback_url: "https://example.com/api/payments/callback".to_string(),
            mpesa_environment: "sandbox".to_string(),
            database_url: "mysql://root@localhost/bingwa_test".to_string(),
            port: 3001,
            host: "127.0.0.1".to_string(),
        }
    }

    #[test]
    fn normalizes_local_formats_to_254() {
        assert_eq!(normalize_phone("0712345678"), "254712345678");
        assert_eq!(normalize_phone("+254712345678"), "254712345678");
        assert_eq!(normalize_phone("712345678"), "254712345678");
        assert_eq!(normalize_phone("110123456"), "254110123456");
        assert_eq!(normalize_phone("0712 345-678"), "254712345678");
        assert_eq!(normalize_phone("(0712) 345 678"), "254712345678");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in [
            "0712345678",
            "+254712345678",
            "712345678",
            "254712345678",
            "110123456",
            "invalid",
            "",
        ] {
            let once = normalize_phone(input);
            assert_eq!(normalize_phone(&once), once, "double-normalizing {:?}", input);
        }
    }

    #[test]
    fn unrecognized_prefixes_pass_through() {
        assert_eq!(normalize_phone("441234567890"), "441234567890");
        assert_eq!(normalize_phone("+14155550100"), "+14155550100");
    }

    #[test]
    fn validates_kenyan_mobile_numbers() {
        assert!(is_valid_phone("254712345678"));
        assert!(is_valid_phone("254110123456"));
        assert!(is_valid_phone("0712345678"));
        assert!(!is_valid_phone("254812345678")); // prefix 8 is not a mobile range
        assert!(!is_valid_phone("25471234")); // too short
        assert!(!is_valid_phone("2547123456789")); // too long
        assert!(!is_valid_phone("25471234567a"));
        assert!(!is_valid_phone(""));
    }

    #[test]
    fn password_is_base64_of_shortcode_passkey_timestamp() {
        let service = MpesaService::new(test_config());
        let password = service.generate_password("20240101120000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20240101120000");
    }

    #[test]
    fn timestamp_is_fourteen_digits() {
        let timestamp = MpesaService::timestamp();
        assert_eq!(timestamp.len(), 14);
        assert!(timestamp.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn truncates_gateway_field_limits() {
        assert_eq!(truncate("BINGWA-ABCDEF12", 12), "BINGWA-ABCDE");
        assert_eq!(truncate("Package Purchase", 13), "Package Purch");
        assert_eq!(truncate("short", 12), "short");
    }

    #[test]
    fn parses_success_callback_with_metadata() {
        let raw = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 55.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "TransactionDate", "Value": 20191219102115u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        });

        let callback = MpesaService::parse_callback(&raw).unwrap();
        assert!(callback.is_success());
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");

        let metadata = callback.callback_metadata.unwrap();
        assert_eq!(
            metadata.string_value("MpesaReceiptNumber").as_deref(),
            Some("NLJ7RT61SV")
        );
        assert_eq!(
            metadata.string_value("TransactionDate").as_deref(),
            Some("20191219102115")
        );
        assert!(metadata.value("Balance").is_none());
    }

    #[test]
    fn parses_failure_callback_without_metadata() {
        let raw = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let callback = MpesaService::parse_callback(&raw).unwrap();
        assert!(!callback.is_success());
        assert_eq!(callback.result_code, 1032);
        assert!(callback.callback_metadata.is_none());
    }

    #[test]
    fn malformed_callback_parses_to_none() {
        assert!(MpesaService::parse_callback(&json!({})).is_none());
        assert!(MpesaService::parse_callback(&json!({"Body": {}})).is_none());
        assert!(MpesaService::parse_callback(&json!("not an object")).is_none());
    }

    #[test]
    fn metadata_lookup_ignores_item_order() {
        let metadata = CallbackMetadata {
            items: vec![
                CallbackItem {
                    name: "TransactionDate".to_string(),
                    value: Some(json!(20240101120000u64)),
                },
                CallbackItem {
                    name: "MpesaReceiptNumber".to_string(),
                    value: Some(json!("ABC123")),
                },
                CallbackItem {
                    name: "Balance".to_string(),
                    value: None,
                },
            ],
        };

        assert_eq!(metadata.string_value("MpesaReceiptNumber").as_deref(), Some("ABC123"));
        assert!(metadata.value("Balance").is_none());
        assert!(metadata.value("PhoneNumber").is_none());
    }
}
