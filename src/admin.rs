//! Minimal `/admin/routes` surface (spec `§6.1`, scoped per `SPEC_FULL.md`'s
//! `[SUPPLEMENT]` decision: POST/DELETE only, not the full CRUD suite the original
//! system exposes, enough to exercise the SSRF guard and x402-upstream probe from
//! spec `§8` scenarios 5 and 6).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::admission;
use crate::config;
use crate::error::{GatewayError, ReasonCode};
use crate::pipeline::PipelineState;
use crate::types::RouteRule;

pub struct AdminState {
    pub pipeline: Arc<PipelineState>,
    pub admin_key: Option<String>,
    pub routes_file: std::path::PathBuf,
}

pub fn routes(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/routes", post(add_route))
        .route("/admin/routes/{tool_id}", delete(remove_route))
        .with_state(state)
}

fn check_admin_auth(headers: &HeaderMap, admin_key: Option<&str>) -> Result<(), GatewayError> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if admission::check_api_key(bearer, None, admin_key) {
        Ok(())
    } else {
        Err(GatewayError::new(ReasonCode::Unauthorized, "missing or invalid admin key"))
    }
}

async fn add_route(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(rule): Json<RouteRule>,
) -> axum::response::Response {
    if let Err(err) = check_admin_auth(&headers, state.admin_key.as_deref()) {
        return err.into_response();
    }

    if let Err(err) = admission::check_ssrf(&rule.provider.backend_url, rule.skip_ssrf) {
        return GatewayError::new(ReasonCode::SsrfBlocked, err.to_string()).into_response();
    }
    if let Err(err) = admission::probe_x402_upstream(&rule.provider.backend_url, &rule.path).await {
        return GatewayError::new(ReasonCode::X402UpstreamBlocked, err.to_string()).into_response();
    }

    if let Err(err) = state.pipeline.route_table.add(rule) {
        return GatewayError::new(ReasonCode::InternalError, err.to_string()).into_response();
    }
    let snapshot = state.pipeline.route_table.snapshot();
    let rules: Vec<RouteRule> = snapshot.rules().cloned().collect();
    if let Err(err) = config::save_routes(&state.routes_file, &rules) {
        return GatewayError::new(ReasonCode::InternalError, err.to_string()).into_response();
    }
    (StatusCode::CREATED, Json(serde_json::json!({"status": "added"}))).into_response()
}

async fn remove_route(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Path(tool_id): Path<String>,
) -> axum::response::Response {
    if let Err(err) = check_admin_auth(&headers, state.admin_key.as_deref()) {
        return err.into_response();
    }
    if let Err(err) = state.pipeline.route_table.remove(&tool_id) {
        return GatewayError::new(ReasonCode::RouteNotFound, err.to_string()).into_response();
    }
    let snapshot = state.pipeline.route_table.snapshot();
    let rules: Vec<RouteRule> = snapshot.rules().cloned().collect();
    if let Err(err) = config::save_routes(&state.routes_file, &rules) {
        return GatewayError::new(ReasonCode::InternalError, err.to_string()).into_response();
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "removed"}))).into_response()
}
