//! Receipt construction and in-memory store (spec `§4.7`).
//!
//! `request_hash`/`response_hash` follow the canonical-JSON-then-sha256 pattern from the
//! pack's receipt builder (deterministic hashing of a `HashInput`-style struct), kept
//! here as a plain `sha2::Sha256` digest of the raw body bytes since the spec only needs
//! content hashing, not a structured preimage.

use std::sync::Mutex;

use crate::types::{MandateVerdict, Outcome, Receipt};

pub fn hash_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}

/// Append-only, query-by-`tool_id`/`outcome` in-memory receipt log (spec `§4.7`, `§5`).
/// No persistence across restarts, per spec `§1` Non-goals.
pub struct ReceiptStore {
    receipts: Mutex<Vec<Receipt>>,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiptStats {
    pub count: usize,
    pub success_count: usize,
    pub total_usdc: rust_decimal::Decimal,
    pub average_latency_ms: Option<f64>,
}

impl ReceiptStore {
    pub fn new() -> Self {
        Self { receipts: Mutex::new(Vec::new()) }
    }

    pub fn append(&self, receipt: Receipt) {
        self.receipts.lock().expect("receipt store lock poisoned").push(receipt);
    }

    /// Newest-first, optionally filtered by `tool_id` and/or `outcome`.
    pub fn query(&self, tool_id: Option<&str>, outcome: Option<Outcome>) -> Vec<Receipt> {
        let guard = self.receipts.lock().expect("receipt store lock poisoned");
        let mut matched: Vec<Receipt> = guard
            .iter()
            .filter(|r| tool_id.is_none_or(|t| r.tool_id.as_deref() == Some(t)))
            .filter(|r| outcome.is_none_or(|o| r.outcome == o))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched
    }

    pub fn stats(&self) -> ReceiptStats {
        let guard = self.receipts.lock().expect("receipt store lock poisoned");
        let count = guard.len();
        let success_count = guard.iter().filter(|r| r.outcome == Outcome::Success).count();
        let total_usdc = guard
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .filter_map(|r| r.price_usdc.as_deref())
            .filter_map(|p| rust_decimal::Decimal::from_str_exact(p).ok())
            .sum();
        let latencies: Vec<u64> = guard.iter().filter_map(|r| r.latency_ms).collect();
        let average_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        };
        ReceiptStats { count, success_count, total_usdc, average_latency_ms }
    }

    pub fn clear(&self) {
        self.receipts.lock().expect("receipt store lock poisoned").clear();
    }
}

impl Default for ReceiptStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters gathered over the course of one pipeline run, assembled into a [`Receipt`]
/// once the request has terminated (spec `§4.7`: "purely a pipeline-local transform").
pub struct ReceiptBuilder {
    pub request_id: uuid::Uuid,
    pub tool_id: Option<String>,
    pub provider_id: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub price_usdc: Option<String>,
    pub chain: String,
    pub mandate_id: Option<String>,
    pub mandate_hash: Option<String>,
    pub mandate_verdict: MandateVerdict,
    pub reason_code: crate::error::ReasonCode,
    pub payment_tx_hash: Option<String>,
    pub facilitator_receipt_id: Option<String>,
    pub request_hash: String,
    pub response_hash: Option<String>,
    pub latency_ms: Option<u64>,
    pub outcome: Outcome,
    pub explanation: String,
}

impl ReceiptBuilder {
    pub fn build(self) -> Receipt {
        Receipt {
            request_id: self.request_id,
            tool_id: self.tool_id,
            provider_id: self.provider_id,
            endpoint: self.endpoint,
            method: self.method,
            timestamp: chrono::Utc::now(),
            price_usdc: self.price_usdc,
            chain: self.chain,
            mandate_id: self.mandate_id,
            mandate_hash: self.mandate_hash,
            mandate_verdict: self.mandate_verdict,
            reason_code: self.reason_code,
            payment_tx_hash: self.payment_tx_hash,
            facilitator_receipt_id: self.facilitator_receipt_id,
            request_hash: self.request_hash,
            response_hash: self.response_hash,
            latency_ms: self.latency_ms,
            outcome: self.outcome,
            explanation: self.explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;

    fn sample(tool_id: &str, outcome: Outcome) -> Receipt {
        ReceiptBuilder {
            request_id: uuid::Uuid::new_v4(),
            tool_id: Some(tool_id.to_string()),
            provider_id: Some("p1".to_string()),
            endpoint: "/api/v1/quote".to_string(),
            method: "GET".to_string(),
            price_usdc: Some("0.01".to_string()),
            chain: "eip155:84532".to_string(),
            mandate_id: None,
            mandate_hash: None,
            mandate_verdict: MandateVerdict::Skipped,
            reason_code: ReasonCode::Ok,
            payment_tx_hash: Some("0xabc".to_string()),
            facilitator_receipt_id: None,
            request_hash: "deadbeef".to_string(),
            response_hash: None,
            latency_ms: Some(12),
            outcome,
            explanation: "ok".to_string(),
        }
        .build()
    }

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn query_filters_by_tool_id_and_outcome() {
        let store = ReceiptStore::new();
        store.append(sample("quote", Outcome::Success));
        store.append(sample("other", Outcome::Denied));
        let matched = store.query(Some("quote"), None);
        assert_eq!(matched.len(), 1);
        let matched = store.query(None, Some(Outcome::Denied));
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn stats_sum_success_only() {
        let store = ReceiptStore::new();
        store.append(sample("quote", Outcome::Success));
        store.append(sample("quote", Outcome::Denied));
        let stats = store.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_usdc, rust_decimal::Decimal::from_str_exact("0.01").unwrap());
    }
}
