//! Core data model: route rules, mandates, receipts, and the admin config document.
//!
//! Mirrors spec `§3`. Field names use `camelCase` on the wire (matching the teacher's
//! `proto` types) but `snake_case` in Rust.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Optional upstream auth header injected by the proxy forwarder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderAuth {
    pub header: String,
    pub value: String,
}

/// The upstream provider behind a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Provider {
    pub id: String,
    pub backend_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProviderAuth>,
}

/// A registered route rule (spec `§3`, `RouteRule`). Immutable once registered; admin
/// mutation replaces it wholesale via `RouteTable::add`/`remove`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRule {
    pub method: String,
    pub path: String,
    pub tool_id: String,
    /// Decimal USDC amount kept as a string to preserve precision on the wire.
    pub price: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub restricted: bool,
    /// Operator escape hatch for the SSRF guard (spec `§9` open question).
    #[serde(default, rename = "_skipSsrf")]
    pub skip_ssrf: bool,
}

impl RouteRule {
    pub fn method_upper(&self) -> String {
        self.method.to_ascii_uppercase()
    }

    pub fn price_decimal(&self) -> Result<Decimal, rust_decimal::Error> {
        Decimal::from_str_exact(&self.price)
    }
}

/// The file-backed routes document (spec `§6.4`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutesDoc {
    pub routes: Vec<RouteRule>,
}

/// AP2 spending mandate carried on a request (spec `§3`, `Mandate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: String,
    pub owner_pubkey: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub max_spend_usdc_per_day: String,
    pub allowlisted_tool_ids: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_user_confirm_for_price_over: Option<String>,
    /// 65-byte EIP-191 personal-message signature, hex-encoded (`0x`-prefixed).
    pub signature: String,
}

/// Outcome of mandate verification (spec `§4.4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateVerdict {
    Approved,
    Denied,
    Skipped,
}

/// Terminal outcome of a request (spec `§3`, `Receipt.outcome`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Denied,
    Error,
    Refunded,
}

/// A structured receipt emitted for every admitted `/api/*` request (spec `§3`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub request_id: uuid::Uuid,
    pub tool_id: Option<String>,
    pub provider_id: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub price_usdc: Option<String>,
    pub chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandate_hash: Option<String>,
    pub mandate_verdict: MandateVerdict,
    pub reason_code: crate::error::ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facilitator_receipt_id: Option<String>,
    pub request_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub outcome: Outcome,
    pub explanation: String,
}

/// Admin-mutable configuration merged over environment defaults (spec `§3`, `ConfigDoc`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub agent_blocklist: HashSet<String>,
    #[serde(default)]
    pub route_groups: Vec<String>,
}

/// The x402 `402` payment-required body (spec `§6.3`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredAccept {
    pub scheme: String,
    pub price: String,
    pub network: String,
    pub pay_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub accepts: Vec<PaymentRequiredAccept>,
    pub description: String,
    pub mime_type: String,
}
