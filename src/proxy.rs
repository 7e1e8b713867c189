//! Proxy forwarder: header hygiene and upstream fetch (spec `§4.6`).

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

use crate::error::ProxyError;
use crate::types::Provider;

/// Hop-by-hop headers per RFC 7230 §6.1, stripped before forwarding upstream.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
];

/// Internal gateway headers that must never reach the upstream (spec `§4.6`).
const INTERNAL_HEADERS: &[&str] = &[
    "x-request-idempotency-key",
    "x-mandate",
    "x-payment",
    "x-receipt",
    "x-mandate-confirm",
];

fn is_stripped(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP.contains(&lower.as_str()) || INTERNAL_HEADERS.contains(&lower.as_str())
}

/// Builds the outbound header set: strips hop-by-hop and internal headers, preserves
/// everything else (joining multi-valued headers with `", "`), then injects
/// `provider.auth` if configured.
pub fn build_upstream_headers(inbound: &HeaderMap, provider: &Provider) -> HeaderMap {
    let mut out = HeaderMap::new();
    let mut seen_names = std::collections::HashSet::new();
    for name in inbound.keys() {
        if seen_names.contains(name.as_str()) || is_stripped(name.as_str()) {
            continue;
        }
        seen_names.insert(name.as_str().to_string());
        let joined = inbound
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&joined) {
            out.insert(name.clone(), value);
        }
    }
    if let Some(auth) = &provider.auth {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(auth.header.as_bytes()),
            HeaderValue::from_str(&auth.value),
        ) {
            out.insert(name, value);
        }
    }
    out
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl UpstreamResponse {
    pub fn response_hash(&self) -> String {
        let digest = Sha256::digest(&self.body);
        hex::encode(digest)
    }
}

/// Builds the upstream URL and issues the request. Transport failures (DNS, connect,
/// TLS) are distinguished from normal non-2xx responses: both return `Ok` here, since the
/// pipeline treats any response it got back as a completed proxy stage — only a genuine
/// `reqwest` transport error becomes `ProxyError::Transport` (spec `§4.6`).
pub async fn forward(
    client: &reqwest::Client,
    provider: &Provider,
    method: &axum::http::Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Result<UpstreamResponse, ProxyError> {
    let url = format!("{}{}", provider.backend_url.trim_end_matches('/'), path_and_query);
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
    let mut request = client.request(reqwest_method, &url);
    for (name, value) in headers.iter() {
        request = request.header(name.as_str(), value.as_bytes());
    }
    let response = request.body(body).send().await?;
    let status = response.status().as_u16();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out_headers.insert(name, value);
        }
    }
    let body = response.bytes().await?;
    Ok(UpstreamResponse { status, headers: out_headers, body })
}
