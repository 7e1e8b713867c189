//! HTTP client for the external x402 facilitator (spec `§1`, `§4.5`).
//!
//! Structurally the same client as the teacher's `x402-axum::facilitator_client`: one
//! `reqwest::Client`, URLs resolved once at construction, a generic `post_json`/`get_json`
//! pair doing serialization, status mapping, and body-read error handling. The payload
//! types here are the gateway's own (`VerifyRequest`/`SettleResponse`, not the teacher's
//! ERC-3009 wire format) since the facilitator contract in scope is just
//! verify/settle/supported over opaque JSON (spec `§1`).

use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PaymentError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequirement {
    pub scheme: String,
    pub price: String,
    pub network: String,
    pub pay_to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
    pub payment_payload: serde_json::Value,
    pub payment_requirements: PaymentRequirement,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    pub payer: Option<String>,
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettleRequest {
    pub payment_payload: serde_json::Value,
    pub payment_requirements: PaymentRequirement,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettleResponse {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub network: Option<String>,
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    bearer_token_source: Option<String>,
}

impl FacilitatorClient {
    pub fn try_new(base_url: &str, bearer_token_source: Option<String>) -> Result<Self, PaymentError> {
        let mut normalized = base_url.trim_end_matches('/').to_string();
        normalized.push('/');
        let base = Url::parse(&normalized).map_err(|e| PaymentError::MalformedHeader(e.to_string()))?;
        Ok(Self {
            verify_url: base.join("verify").expect("static join"),
            settle_url: base.join("settle").expect("static join"),
            supported_url: base.join("supported").expect("static join"),
            client: Client::builder().timeout(DEFAULT_TIMEOUT).build().expect("reqwest client"),
            bearer_token_source,
        })
    }

    /// Mints a per-request bearer token bound to `method + host + path`, the scheme
    /// described in spec `§4.5`. Absent a configured key pair, no `Authorization` header
    /// is sent and the facilitator is assumed to be unauthenticated.
    fn bearer_for(&self, method: &str, url: &Url) -> Option<String> {
        let key = self.bearer_token_source.as_ref()?;
        let host = url.host_str().unwrap_or("");
        let path = url.path();
        let preimage = format!("{key}:{method}:{host}:{path}");
        Some(format!("Bearer {}", hex::encode(alloy_primitives::keccak256(preimage.as_bytes()))))
    }

    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, PaymentError> {
        self.post_json(&self.verify_url, request).await
    }

    pub async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, PaymentError> {
        self.post_json(&self.settle_url, request).await
    }

    pub async fn supported(&self) -> Result<SupportedResponse, PaymentError> {
        let mut req = self.client.get(self.supported_url.clone());
        if let Some(token) = self.bearer_for("GET", &self.supported_url) {
            req = req.header("Authorization", token);
        }
        let response = req.send().await?;
        Ok(response.json().await?)
    }

    async fn post_json<T, R>(&self, url: &Url, payload: &T) -> Result<R, PaymentError>
    where
        T: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self.client.post(url.clone()).json(payload);
        if let Some(token) = self.bearer_for("POST", url) {
            req = req.header("Authorization", token);
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::VerificationFailed(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }
}
