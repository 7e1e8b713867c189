//! HTTP surface: `GET /health`, `ALL /api/*` (spec `§6.1`).
//!
//! `/api/*` handlers run the full admission pipeline and translate its result into an
//! axum `Response`, attaching the `X-Receipt` header on success (spec `§6.1`). Per-stage
//! instrumentation follows the teacher's `#[instrument(skip_all)]` style in
//! `handlers.rs`.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::pipeline::{self, PipelineRequest};

pub fn routes(state: Arc<pipeline::PipelineState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/{*path}", any(api))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!({"status": "ok"})))
}

#[instrument(skip_all, fields(method = %req.method(), uri = %req.uri()))]
async fn api(State(state): State<Arc<pipeline::PipelineState>>, req: Request<Body>) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let path = uri.path().strip_prefix("/api").unwrap_or(uri.path()).to_string();
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(%err, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let pipeline_request = PipelineRequest { method: method.clone(), path, query, headers, body };

    match pipeline::run(&state, pipeline_request).await {
        Ok(response) => {
            let mut builder = Response::builder().status(response.status);
            for (name, value) in response.headers.iter() {
                builder = builder.header(name, value);
            }
            if let Ok(value) = HeaderValue::from_str(&response.receipt_header) {
                builder = builder.header("x-receipt", value);
            }
            builder.body(Body::from(response.body)).unwrap_or_else(|_| {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
            })
        }
        Err(gateway_error) => gateway_error.into_response(),
    }
}
