//! Error taxonomy for the admission pipeline.
//!
//! Every denial a request can receive maps to exactly one [`ReasonCode`]. Component
//! errors (`RouteError`, `MandateError`, ...) carry enough context for logging and are
//! converted to a `(StatusCode, ReasonCode)` pair by [`GatewayError`], which is the only
//! type handlers return on the error path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Closed enum of denial/outcome reasons, per spec `§7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Ok,
    Unauthorized,
    AgentBlocked,
    RateLimited,
    RouteNotFound,
    SsrfBlocked,
    X402UpstreamBlocked,
    ReplayDetected,
    MandateExpired,
    EndpointNotAllowlisted,
    MandateBudgetExceeded,
    MandateConfirmRequired,
    InvalidSignature,
    InvalidPayment,
    UpstreamErrorNoCharge,
    InternalError,
}

impl ReasonCode {
    pub fn http_status(self) -> StatusCode {
        match self {
            ReasonCode::Ok => StatusCode::OK,
            ReasonCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ReasonCode::AgentBlocked => StatusCode::FORBIDDEN,
            ReasonCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ReasonCode::RouteNotFound => StatusCode::NOT_FOUND,
            ReasonCode::SsrfBlocked | ReasonCode::X402UpstreamBlocked => StatusCode::BAD_REQUEST,
            ReasonCode::ReplayDetected => StatusCode::CONFLICT,
            ReasonCode::MandateExpired
            | ReasonCode::EndpointNotAllowlisted
            | ReasonCode::MandateBudgetExceeded
            | ReasonCode::MandateConfirmRequired
            | ReasonCode::InvalidSignature => StatusCode::FORBIDDEN,
            ReasonCode::InvalidPayment => StatusCode::PAYMENT_REQUIRED,
            ReasonCode::UpstreamErrorNoCharge => StatusCode::BAD_GATEWAY,
            ReasonCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors raised while compiling or mutating the route table (spec `§4.1`, `§4.9`).
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("path must start with '/': {0}")]
    InvalidPath(String),
    #[error("duplicate tool_id: {0}")]
    DuplicateToolId(String),
    #[error("tool_id not found: {0}")]
    NotFound(String),
    #[error("backend_url is not publicly routable: {0}")]
    SsrfBlocked(String),
    #[error("backend_url could not be resolved: {0}")]
    UnresolvableHost(String),
    #[error("upstream already charges via x402 at the probe path")]
    X402UpstreamBlocked,
    #[error("invalid backend_url: {0}")]
    InvalidUrl(String),
}

/// Errors raised while verifying an AP2 mandate (spec `§4.4`).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum MandateError {
    #[error("mandate has expired")]
    Expired,
    #[error("tool is not in the mandate's allowlist")]
    NotAllowlisted,
    #[error("price exceeds the mandate's confirmation threshold")]
    ConfirmRequired,
    #[error("daily spend cap would be exceeded")]
    BudgetExceeded,
    #[error("mandate signature does not recover to owner_pubkey")]
    InvalidSignature,
    #[error("malformed mandate payload")]
    Malformed,
}

impl MandateError {
    pub fn reason_code(self) -> ReasonCode {
        match self {
            MandateError::Expired => ReasonCode::MandateExpired,
            MandateError::NotAllowlisted => ReasonCode::EndpointNotAllowlisted,
            MandateError::ConfirmRequired => ReasonCode::MandateConfirmRequired,
            MandateError::BudgetExceeded => ReasonCode::MandateBudgetExceeded,
            MandateError::InvalidSignature | MandateError::Malformed => {
                ReasonCode::InvalidSignature
            }
        }
    }
}

/// Errors raised by the payment coordinator (spec `§4.5`).
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("facilitator rejected payment: {0}")]
    VerificationFailed(String),
    #[error("facilitator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed X-Payment header: {0}")]
    MalformedHeader(String),
    #[error("no compiled route for tool_id {0}")]
    RouteNotCompiled(String),
}

/// Errors raised by the proxy forwarder (spec `§4.6`).
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while loading configuration (spec `§4.10`, `§6.5`, `§6.6`).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("PAY_TO_ADDRESS is required but was not set")]
    MissingPayToAddress,
    #[error("failed to read routes file {path}: {source}")]
    RoutesFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse routes file: {0}")]
    RoutesFileParse(#[from] serde_json::Error),
    #[error("failed to write routes file: {0}")]
    RoutesFileWrite(std::io::Error),
    #[error(transparent)]
    InvalidRoute(#[from] RouteError),
}

/// Top-level error returned from `/api/*` handlers. Carries everything needed to build
/// one JSON denial body and to emit one receipt.
#[derive(Debug)]
pub struct GatewayError {
    pub reason: ReasonCode,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl GatewayError {
    pub fn new(reason: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl From<MandateError> for GatewayError {
    fn from(err: MandateError) -> Self {
        GatewayError::new(err.reason_code(), err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.reason.http_status();
        let mut body = json!({
            "reasonCode": self.reason,
            "error": self.message,
        });
        if let Some(detail) = self.detail {
            body["detail"] = detail;
        }
        (status, Json(body)).into_response()
    }
}
