//! Payment coordinator: the x402 protocol state machine (spec `§4.5`).
//!
//! Grounded on `x402-axum::layer::X402Paygate`'s `extract_payment_payload` /
//! `verify_payment` / `settle_payment` split, adapted from a tower layer (operating on
//! generic middleware state) into a plain struct the pipeline controller calls directly,
//! since this gateway's admission pipeline is hand-orchestrated rather than tower-layered
//! (spec `§4.8`).

use base64::Engine;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::PaymentError;
use crate::payment::facilitator_client::{
    FacilitatorClient, PaymentRequirement, SettleRequest, VerifyRequest,
};
use crate::route_table::RouteObserver;
use crate::types::{PaymentRequiredAccept, PaymentRequiredBody, RouteRule};

pub enum RequireOutcome {
    Required(PaymentRequiredBody),
    Verified { payload: serde_json::Value, payer: Option<String> },
    Denied(String),
}

pub struct SettleOutcome {
    pub tx_hash: Option<String>,
    pub payer: Option<String>,
    pub network: Option<String>,
}

/// The payment coordinator's own compiled route list, kept in sync with the main
/// `RouteTable` via the `RouteObserver` impl below rather than twin-written by the admin
/// handlers (spec `§4.5`, `§9`).
pub struct PaymentCoordinator {
    facilitator: FacilitatorClient,
    network_caip2: String,
    routes: RwLock<HashMap<String, RouteRule>>,
}

impl PaymentCoordinator {
    pub fn new(facilitator: FacilitatorClient, network_caip2: String) -> Self {
        Self {
            facilitator,
            network_caip2,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or replaces the compiled route for `rule.tool_id`. Called directly to
    /// seed routes loaded at boot, and via `RouteObserver` for every later mutation.
    pub fn add_route(&self, rule: RouteRule) {
        self.routes
            .write()
            .expect("coordinator route lock poisoned")
            .insert(rule.tool_id.clone(), rule);
    }

    pub fn remove_route(&self, tool_id: &str) {
        self.routes.write().expect("coordinator route lock poisoned").remove(tool_id);
    }

    fn price_for(&self, tool_id: &str) -> Option<String> {
        self.routes
            .read()
            .expect("coordinator route lock poisoned")
            .get(tool_id)
            .map(|rule| rule.price.clone())
    }

    fn requirement(&self, price: &str, pay_to: &str) -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".to_string(),
            price: price.to_string(),
            network: self.network_caip2.clone(),
            pay_to: pay_to.to_string(),
        }
    }

    /// Inspects the `X-Payment` header (if present) and either issues a 402 body or calls
    /// the facilitator's `verify`. The price quoted comes from the coordinator's own
    /// compiled route for `tool_id`, not a caller-supplied value.
    pub async fn require(
        &self,
        tool_id: &str,
        x_payment_header: Option<&str>,
        pay_to: &str,
    ) -> Result<RequireOutcome, PaymentError> {
        let price = self
            .price_for(tool_id)
            .ok_or_else(|| PaymentError::RouteNotCompiled(tool_id.to_string()))?;
        let requirement = self.requirement(&price, pay_to);
        let Some(header) = x_payment_header else {
            return Ok(RequireOutcome::Required(PaymentRequiredBody {
                accepts: vec![PaymentRequiredAccept {
                    scheme: requirement.scheme.clone(),
                    price: requirement.price.clone(),
                    network: requirement.network.clone(),
                    pay_to: requirement.pay_to.clone(),
                }],
                description: "Payment required to access this resource".to_string(),
                mime_type: "application/json".to_string(),
            }));
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(header)
            .map_err(|e| PaymentError::MalformedHeader(e.to_string()))?;
        let payload: serde_json::Value =
            serde_json::from_slice(&decoded).map_err(|e| PaymentError::MalformedHeader(e.to_string()))?;
        let verify_request = VerifyRequest {
            payment_payload: payload.clone(),
            payment_requirements: requirement,
        };
        let response = self.facilitator.verify(&verify_request).await?;
        if response.is_valid {
            Ok(RequireOutcome::Verified { payload, payer: response.payer })
        } else {
            Ok(RequireOutcome::Denied(response.invalid_reason.unwrap_or_else(|| "payment rejected".to_string())))
        }
    }

    /// Calls `settle` after the upstream proxy has succeeded. Both semantic failures
    /// (`success: false`) and transport-level failures (timeout, connection refused,
    /// non-2xx, malformed body) are logged and surfaced as a null `payment_tx_hash`
    /// rather than propagated as a pipeline error (spec `§4.5`, `§9` open question) — a
    /// receipt must still be emitted for a request whose upstream call already
    /// succeeded.
    pub async fn settle(&self, tool_id: &str, payload: serde_json::Value, pay_to: &str) -> SettleOutcome {
        let Some(price) = self.price_for(tool_id) else {
            tracing::error!(%tool_id, "settle called for a route no longer compiled in the coordinator");
            return SettleOutcome { tx_hash: None, payer: None, network: None };
        };
        let request = SettleRequest {
            payment_payload: payload,
            payment_requirements: self.requirement(&price, pay_to),
        };
        let response = match self.facilitator.settle(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(%err, "facilitator settle request failed");
                return SettleOutcome { tx_hash: None, payer: None, network: None };
            }
        };
        if response.success {
            SettleOutcome {
                tx_hash: response.tx_hash,
                payer: None,
                network: response.network,
            }
        } else {
            tracing::error!(reason = ?response.error_reason, "facilitator settlement failed");
            SettleOutcome { tx_hash: None, payer: None, network: None }
        }
    }
}

impl RouteObserver for PaymentCoordinator {
    fn on_route_added(&self, rule: &RouteRule) {
        self.add_route(rule.clone());
    }

    fn on_route_removed(&self, tool_id: &str) {
        self.remove_route(tool_id);
    }
}

pub fn price_to_decimal(price: &str) -> Result<Decimal, PaymentError> {
    Decimal::from_str_exact(price.trim_start_matches('$'))
        .map_err(|e| PaymentError::MalformedHeader(e.to_string()))
}
