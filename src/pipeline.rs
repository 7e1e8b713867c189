//! Pipeline controller: fixed-order stage orchestration (spec `§4.8`).
//!
//! Mirrors the shape of `x402-axum::layer::X402Paygate::handle_request` (extract -> verify
//! -> call inner -> settle -> attach response header), generalized with the admission
//! stages (API key, blocklist, route match, replay, mandate) this gateway adds in front.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use base64::Engine;
use std::sync::Arc;
use std::time::Instant;

use crate::admission;
use crate::error::{GatewayError, ReasonCode};
use crate::mandate;
use crate::payment::coordinator::{PaymentCoordinator, RequireOutcome};
use crate::proxy;
use crate::receipt::{hash_bytes, ReceiptBuilder, ReceiptStore};
use crate::replay_store::ReplayStore;
use crate::route_table::RouteTable;
use crate::spend_tracker::SpendTracker;
use crate::types::{Mandate, MandateVerdict, Outcome};

pub struct PipelineState {
    pub route_table: Arc<RouteTable>,
    pub replay_store: Arc<ReplayStore>,
    pub spend_tracker: Arc<SpendTracker>,
    pub receipt_store: Arc<ReceiptStore>,
    pub payment_coordinator: Arc<PaymentCoordinator>,
    pub http_client: reqwest::Client,
    pub network_caip2: String,
    pub pay_to_address: String,
    pub api_key: Option<String>,
    pub agent_blocklist: Arc<std::sync::RwLock<std::collections::HashSet<String>>>,
}

pub struct PipelineRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct PipelineResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub receipt_header: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn deny(
    request_id: uuid::Uuid,
    endpoint: &str,
    method: &str,
    reason: ReasonCode,
    message: impl Into<String>,
    request_hash: &str,
    started: Instant,
) -> (GatewayError, crate::types::Receipt) {
    let message = message.into();
    let receipt = ReceiptBuilder {
        request_id,
        tool_id: None,
        provider_id: None,
        endpoint: endpoint.to_string(),
        method: method.to_string(),
        price_usdc: None,
        chain: String::new(),
        mandate_id: None,
        mandate_hash: None,
        mandate_verdict: MandateVerdict::Skipped,
        reason_code: reason,
        payment_tx_hash: None,
        facilitator_receipt_id: None,
        request_hash: request_hash.to_string(),
        response_hash: None,
        latency_ms: Some(started.elapsed().as_millis() as u64),
        outcome: Outcome::Denied,
        explanation: message.clone(),
    }
    .build();
    (GatewayError::new(reason, message), receipt)
}

/// Runs the full admission pipeline for one `/api/*` request. Always returns exactly one
/// receipt appended to `state.receipt_store` before returning, whether the request
/// succeeds, is denied, or errors (spec `§4.8`, invariant 1).
pub async fn run(state: &PipelineState, request: PipelineRequest) -> Result<PipelineResponse, GatewayError> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4();
    let endpoint = format!("{}{}", request.path, request.query);
    let method = request.method.as_str().to_string();
    let request_hash = hash_bytes(&request.body);

    macro_rules! deny_and_record {
        ($reason:expr, $message:expr) => {{
            let (err, receipt) = deny(request_id, &endpoint, &method, $reason, $message, &request_hash, started);
            state.receipt_store.append(receipt);
            return Err(err);
        }};
    }

    // 1. API-key check.
    let bearer = header_str(&request.headers, "authorization").and_then(|v| v.strip_prefix("Bearer "));
    let api_key_header = header_str(&request.headers, "x-api-key");
    if !admission::check_api_key(bearer, api_key_header, state.api_key.as_deref()) {
        deny_and_record!(ReasonCode::Unauthorized, "missing or invalid API key");
    }

    // 2. Agent blocklist.
    if let Some(agent) = header_str(&request.headers, "x-agent-address") {
        let blocklist = state.agent_blocklist.read().expect("blocklist lock poisoned");
        if admission::is_agent_blocked(agent, &blocklist) {
            deny_and_record!(ReasonCode::AgentBlocked, "agent address is blocklisted");
        }
    }

    // 3. Route match.
    let snapshot = state.route_table.snapshot();
    let Some((compiled, _params)) = snapshot.match_route(request.method.as_str(), &request.path) else {
        deny_and_record!(ReasonCode::RouteNotFound, "no route matches this method and path");
    };
    let rule = compiled.rule.clone();

    // 4. Idempotency / replay.
    if let Some(idempotency_key) = header_str(&request.headers, "x-request-idempotency-key") {
        let fingerprint = (idempotency_key.to_string(), request_hash.clone());
        if state.replay_store.check_and_store(fingerprint) {
            deny_and_record!(ReasonCode::ReplayDetected, "duplicate request within TTL");
        }
    }

    let Ok(price) = rule.price_decimal() else {
        let receipt = ReceiptBuilder {
            request_id,
            tool_id: Some(rule.tool_id.clone()),
            provider_id: Some(rule.provider.id.clone()),
            endpoint: endpoint.clone(),
            method: method.clone(),
            price_usdc: Some(rule.price.clone()),
            chain: state.network_caip2.clone(),
            mandate_id: None,
            mandate_hash: None,
            mandate_verdict: MandateVerdict::Skipped,
            reason_code: ReasonCode::InternalError,
            payment_tx_hash: None,
            facilitator_receipt_id: None,
            request_hash: request_hash.clone(),
            response_hash: None,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            outcome: Outcome::Error,
            explanation: "route has an invalid price".to_string(),
        }
        .build();
        state.receipt_store.append(receipt);
        return Err(GatewayError::new(ReasonCode::InternalError, "route has an invalid price"));
    };

    // 5. Mandate verify (optional).
    let mut mandate_verdict = MandateVerdict::Skipped;
    let mut mandate_id = None;
    let mut mandate_hash = None;
    let mut mandate_daily_cap = None;
    if let Some(mandate_header) = header_str(&request.headers, "x-mandate") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(mandate_header)
            .map_err(|_| ())
            .and_then(|bytes| serde_json::from_slice::<Mandate>(&bytes).map_err(|_| ()));
        let Ok(parsed_mandate) = decoded else {
            deny_and_record!(ReasonCode::InvalidSignature, "malformed X-Mandate header");
        };
        mandate_id = Some(parsed_mandate.mandate_id.clone());
        mandate_hash = Some(hash_bytes(mandate::canonical_payload(&parsed_mandate).as_bytes()));
        mandate_daily_cap = rust_decimal::Decimal::from_str_exact(&parsed_mandate.max_spend_usdc_per_day).ok();
        let confirm_present = request.headers.contains_key(mandate::CONFIRM_HEADER);
        match mandate::verify(&parsed_mandate, &rule.tool_id, price, confirm_present, &state.spend_tracker) {
            Ok(verdict) => mandate_verdict = verdict,
            Err(mandate_err) => {
                let gateway_err: GatewayError = mandate_err.into();
                let receipt = ReceiptBuilder {
                    request_id,
                    tool_id: Some(rule.tool_id.clone()),
                    provider_id: Some(rule.provider.id.clone()),
                    endpoint: endpoint.clone(),
                    method: method.clone(),
                    price_usdc: Some(rule.price.clone()),
                    chain: state.network_caip2.clone(),
                    mandate_id: mandate_id.clone(),
                    mandate_hash: mandate_hash.clone(),
                    mandate_verdict: MandateVerdict::Denied,
                    reason_code: gateway_err.reason,
                    payment_tx_hash: None,
                    facilitator_receipt_id: None,
                    request_hash: request_hash.clone(),
                    response_hash: None,
                    latency_ms: Some(started.elapsed().as_millis() as u64),
                    outcome: Outcome::Denied,
                    explanation: gateway_err.message.clone(),
                }
                .build();
                state.receipt_store.append(receipt);
                return Err(gateway_err);
            }
        }
    }

    // 6. Payment verify.
    let x_payment = header_str(&request.headers, "x-payment");
    let require_outcome = match state
        .payment_coordinator
        .require(&rule.tool_id, x_payment, &state.pay_to_address)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            let receipt = ReceiptBuilder {
                request_id,
                tool_id: Some(rule.tool_id.clone()),
                provider_id: Some(rule.provider.id.clone()),
                endpoint: endpoint.clone(),
                method: method.clone(),
                price_usdc: Some(rule.price.clone()),
                chain: state.network_caip2.clone(),
                mandate_id,
                mandate_hash,
                mandate_verdict,
                reason_code: ReasonCode::InvalidPayment,
                payment_tx_hash: None,
                facilitator_receipt_id: None,
                request_hash,
                response_hash: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                outcome: Outcome::Error,
                explanation: err.to_string(),
            }
            .build();
            state.receipt_store.append(receipt);
            return Err(GatewayError::new(ReasonCode::InvalidPayment, err.to_string()));
        }
    };

    let (payment_payload, payer) = match require_outcome {
        RequireOutcome::Required(body) => {
            let receipt = ReceiptBuilder {
                request_id,
                tool_id: Some(rule.tool_id.clone()),
                provider_id: Some(rule.provider.id.clone()),
                endpoint: endpoint.clone(),
                method: method.clone(),
                price_usdc: Some(rule.price.clone()),
                chain: state.network_caip2.clone(),
                mandate_id,
                mandate_hash,
                mandate_verdict,
                reason_code: ReasonCode::InvalidPayment,
                payment_tx_hash: None,
                facilitator_receipt_id: None,
                request_hash,
                response_hash: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                outcome: Outcome::Denied,
                explanation: "no X-Payment header; quote issued".to_string(),
            }
            .build();
            state.receipt_store.append(receipt);
            return Err(GatewayError::new(ReasonCode::InvalidPayment, "payment required")
                .with_detail(serde_json::to_value(body).unwrap_or_default()));
        }
        RequireOutcome::Denied(reason) => {
            let receipt = ReceiptBuilder {
                request_id,
                tool_id: Some(rule.tool_id.clone()),
                provider_id: Some(rule.provider.id.clone()),
                endpoint: endpoint.clone(),
                method: method.clone(),
                price_usdc: Some(rule.price.clone()),
                chain: state.network_caip2.clone(),
                mandate_id,
                mandate_hash,
                mandate_verdict,
                reason_code: ReasonCode::InvalidPayment,
                payment_tx_hash: None,
                facilitator_receipt_id: None,
                request_hash,
                response_hash: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                outcome: Outcome::Denied,
                explanation: reason.clone(),
            }
            .build();
            state.receipt_store.append(receipt);
            return Err(GatewayError::new(ReasonCode::InvalidPayment, reason));
        }
        RequireOutcome::Verified { payload, payer } => (payload, payer),
    };

    // 7. Upstream proxy.
    let upstream_headers = proxy::build_upstream_headers(&request.headers, &rule.provider);
    let path_and_query = format!("{}{}", request.path, request.query);
    let proxy_result = proxy::forward(
        &state.http_client,
        &rule.provider,
        &request.method,
        &path_and_query,
        upstream_headers,
        request.body,
    )
    .await;

    let upstream = match proxy_result {
        Ok(upstream) => upstream,
        Err(err) => {
            let receipt = ReceiptBuilder {
                request_id,
                tool_id: Some(rule.tool_id.clone()),
                provider_id: Some(rule.provider.id.clone()),
                endpoint: endpoint.clone(),
                method: method.clone(),
                price_usdc: Some(rule.price.clone()),
                chain: state.network_caip2.clone(),
                mandate_id,
                mandate_hash,
                mandate_verdict,
                reason_code: ReasonCode::UpstreamErrorNoCharge,
                payment_tx_hash: None,
                facilitator_receipt_id: None,
                request_hash,
                response_hash: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                outcome: Outcome::Error,
                explanation: err.to_string(),
            }
            .build();
            state.receipt_store.append(receipt);
            return Err(GatewayError::new(ReasonCode::UpstreamErrorNoCharge, err.to_string()));
        }
    };

    // 8. Settlement — only attempted because the proxy stage returned.
    let response_hash = upstream.response_hash();
    let settle_outcome = state
        .payment_coordinator
        .settle(&rule.tool_id, payment_payload, &state.pay_to_address)
        .await;

    // Spend is recorded only after a real settlement, and only against a mandate that was
    // actually presented (spec `§4.8` invariant: "no spend is recorded unless
    // settlement.tx_hash != null").
    if settle_outcome.tx_hash.is_some() {
        if let (Some(id), Some(cap)) = (mandate_id.as_deref(), mandate_daily_cap) {
            state.spend_tracker.try_record(id, price, cap);
        }
    }

    let receipt = ReceiptBuilder {
        request_id,
        tool_id: Some(rule.tool_id.clone()),
        provider_id: Some(rule.provider.id.clone()),
        endpoint: endpoint.clone(),
        method: method.clone(),
        price_usdc: Some(rule.price.clone()),
        chain: state.network_caip2.clone(),
        mandate_id,
        mandate_hash,
        mandate_verdict,
        reason_code: ReasonCode::Ok,
        payment_tx_hash: settle_outcome.tx_hash.clone(),
        facilitator_receipt_id: None,
        request_hash,
        response_hash: Some(response_hash),
        latency_ms: Some(started.elapsed().as_millis() as u64),
        outcome: Outcome::Success,
        explanation: "request admitted and settled".to_string(),
    }
    .build();
    let _ = payer;
    let receipt_header = base64::engine::general_purpose::STANDARD
        .encode(serde_json::to_vec(&receipt).unwrap_or_default());
    state.receipt_store.append(receipt);

    Ok(PipelineResponse {
        status: upstream.status,
        headers: upstream.headers,
        body: upstream.body,
        receipt_header,
    })
}
