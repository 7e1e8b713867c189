//! Integration tests for the six seed scenarios in spec `§8`.
//!
//! Stands up the gateway's `Router` against a local stub facilitator and a local stub
//! upstream (both tiny `axum` servers on loopback, per `SPEC_FULL.md`'s test-tooling
//! section — no new HTTP-mocking dependency), and drives it with
//! `tower::ServiceExt::oneshot`, the way axum services are typically tested.

use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower::ServiceExt;

use x402_gateway::config::CliArgs;
use x402_gateway::mandate::canonical_payload;
use x402_gateway::network::resolve_caip2;
use x402_gateway::payment::coordinator::PaymentCoordinator;
use x402_gateway::payment::facilitator_client::FacilitatorClient;
use x402_gateway::pipeline::PipelineState;
use x402_gateway::receipt::ReceiptStore;
use x402_gateway::replay_store::ReplayStore;
use x402_gateway::route_table::{CompiledTable, RouteTable};
use x402_gateway::spend_tracker::SpendTracker;
use x402_gateway::types::{Mandate, Provider, RouteRule};
use x402_gateway::{admin, handlers};

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A minimal stand-in facilitator: `/verify` approves any payload carrying `"ok": true`;
/// `/settle` always succeeds with a fixed tx hash.
async fn spawn_stub_facilitator() -> SocketAddr {
    async fn verify(Json(body): Json<Value>) -> Json<Value> {
        let ok = body["payment_payload"]["ok"].as_bool().unwrap_or(false);
        if ok {
            Json(json!({"isValid": true, "payer": "0xpayer", "invalidReason": null}))
        } else {
            Json(json!({"isValid": false, "payer": null, "invalidReason": "payload not ok"}))
        }
    }
    async fn settle() -> Json<Value> {
        Json(json!({"success": true, "tx_hash": "0xsettled", "network": "eip155:84532", "error_reason": null}))
    }
    let router = Router::new().route("/verify", post(verify)).route("/settle", post(settle));
    spawn(router).await
}

/// A stub upstream that answers `GET /quote` with `{"q":42}` and `GET /probed` with a
/// 402 `payment-required` header (used by the x402-upstream-probe scenario).
async fn spawn_stub_upstream() -> SocketAddr {
    async fn quote() -> Json<Value> {
        Json(json!({"q": 42}))
    }
    async fn x402_probed() -> axum::response::Response {
        axum::response::Response::builder()
            .status(402)
            .header("payment-required", "true")
            .body(Body::empty())
            .unwrap()
    }
    let router = Router::new().route("/quote", get(quote)).route("/probed", get(x402_probed));
    spawn(router).await
}

fn base_cli(facilitator_url: String) -> CliArgs {
    CliArgs {
        pay_to_address: "0x000000000000000000000000000000000000aa".to_string(),
        port: 0,
        facilitator_url,
        base_network: "base-sepolia".to_string(),
        admin_key: Some("admin-secret".to_string()),
        api_key: None,
        routes_file: std::env::temp_dir().join(format!("x402-test-routes-{}.json", uuid::Uuid::new_v4())),
        config_doc_file: std::env::temp_dir().join(format!("x402-test-config-{}.json", uuid::Uuid::new_v4())),
        replay_ttl_ms: 60_000,
    }
}

fn build_state(cli: &CliArgs, initial_routes: Vec<RouteRule>) -> Arc<PipelineState> {
    let facilitator = FacilitatorClient::try_new(&cli.facilitator_url, None).unwrap();
    let coordinator = Arc::new(PaymentCoordinator::new(facilitator, resolve_caip2(&cli.base_network)));
    let table = RouteTable::new(CompiledTable::compile(initial_routes).unwrap());
    for rule in table.snapshot().rules() {
        coordinator.add_route(rule.clone());
    }
    let table = Arc::new(table);
    table.subscribe(coordinator.clone());
    Arc::new(PipelineState {
        route_table: table,
        replay_store: Arc::new(ReplayStore::new(Duration::from_millis(cli.replay_ttl_ms))),
        spend_tracker: Arc::new(SpendTracker::new()),
        receipt_store: Arc::new(ReceiptStore::new()),
        payment_coordinator: coordinator,
        http_client: reqwest::Client::new(),
        network_caip2: resolve_caip2(&cli.base_network),
        pay_to_address: cli.pay_to_address.clone(),
        api_key: cli.api_key.clone(),
        agent_blocklist: Arc::new(RwLock::new(Default::default())),
    })
}

fn quote_route(upstream: SocketAddr) -> RouteRule {
    RouteRule {
        method: "GET".to_string(),
        path: "/v1/quote".to_string(),
        tool_id: "quote".to_string(),
        price: "0.01".to_string(),
        provider: Provider {
            id: "upstream".to_string(),
            backend_url: format!("http://{upstream}"),
            auth: None,
        },
        group: None,
        description: None,
        restricted: false,
        skip_ssrf: true,
    }
}

async fn signed_mandate(allowlist: &[&str], daily_cap: &str) -> Mandate {
    let signer = PrivateKeySigner::random();
    let mut mandate = Mandate {
        mandate_id: "m1".to_string(),
        owner_pubkey: signer.address().to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::days(1),
        max_spend_usdc_per_day: daily_cap.to_string(),
        allowlisted_tool_ids: allowlist.iter().map(|s| s.to_string()).collect(),
        require_user_confirm_for_price_over: None,
        signature: String::new(),
    };
    let payload = canonical_payload(&mandate);
    let signature = signer.sign_message(payload.as_bytes()).await.unwrap();
    mandate.signature = format!("0x{}", hex::encode(signature.as_bytes()));
    mandate
}

fn mandate_header(mandate: &Mandate) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(mandate).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[tokio::test]
async fn scenario_1_quote_without_payment_returns_402() {
    let upstream = spawn_stub_upstream().await;
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![quote_route(upstream)]);
    let app = handlers::routes(state);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/quote").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn scenario_2_valid_payment_and_mandate_succeeds() {
    let upstream = spawn_stub_upstream().await;
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![quote_route(upstream)]);
    let app = handlers::routes(state);

    let mandate = signed_mandate(&["quote"], "10.00").await;
    use base64::Engine;
    let payment_header =
        base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&json!({"ok": true})).unwrap());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/quote")
                .header("x-payment", payment_header)
                .header("x-mandate", mandate_header(&mandate))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-receipt"));
    let body = body_json(response).await;
    assert_eq!(body["q"], 42);
}

#[tokio::test]
async fn scenario_3_tool_not_allowlisted_denies_without_settlement() {
    let upstream = spawn_stub_upstream().await;
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![quote_route(upstream)]);
    let app = handlers::routes(state);

    let mandate = signed_mandate(&["other"], "10.00").await;
    use base64::Engine;
    let payment_header =
        base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&json!({"ok": true})).unwrap());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/quote")
                .header("x-payment", payment_header)
                .header("x-mandate", mandate_header(&mandate))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["reasonCode"], "ENDPOINT_NOT_ALLOWLISTED");
}

#[tokio::test]
async fn scenario_4_duplicate_idempotency_key_is_rejected() {
    let upstream = spawn_stub_upstream().await;
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![quote_route(upstream)]);
    let app = handlers::routes(state);

    use base64::Engine;
    let payment_header =
        base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&json!({"ok": true})).unwrap());

    let make_request = || {
        Request::builder()
            .uri("/api/v1/quote")
            .header("x-payment", payment_header.clone())
            .header("x-request-idempotency-key", "idem-1")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn scenario_5_admin_route_with_loopback_backend_is_ssrf_blocked() {
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![]);
    let admin_state = Arc::new(admin::AdminState {
        pipeline: state,
        admin_key: cli.admin_key.clone(),
        routes_file: cli.routes_file.clone(),
    });
    let app = admin::routes(admin_state.clone());

    let rule = RouteRule {
        method: "GET".to_string(),
        path: "/blocked".to_string(),
        tool_id: "blocked".to_string(),
        price: "0.01".to_string(),
        provider: Provider {
            id: "local".to_string(),
            backend_url: "http://127.0.0.1:9000".to_string(),
            auth: None,
        },
        group: None,
        description: None,
        restricted: false,
        skip_ssrf: false,
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/routes")
                .header("authorization", "Bearer admin-secret")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&rule).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["reasonCode"], "SSRF_BLOCKED");
    assert_eq!(admin_state.pipeline.route_table.snapshot().len(), 0);
}

#[tokio::test]
async fn scenario_6_admin_route_with_x402_upstream_is_blocked() {
    let upstream = spawn_stub_upstream().await;
    let facilitator = spawn_stub_facilitator().await;
    let cli = base_cli(format!("http://{facilitator}"));
    let state = build_state(&cli, vec![]);
    let admin_state = Arc::new(admin::AdminState {
        pipeline: state,
        admin_key: cli.admin_key.clone(),
        routes_file: cli.routes_file.clone(),
    });
    let app = admin::routes(admin_state.clone());

    let rule = RouteRule {
        method: "GET".to_string(),
        path: "/probed".to_string(),
        tool_id: "probed".to_string(),
        price: "0.01".to_string(),
        provider: Provider {
            id: "upstream".to_string(),
            backend_url: format!("http://{upstream}"),
            auth: None,
        },
        group: None,
        description: None,
        restricted: false,
        skip_ssrf: true,
    };

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/routes")
                .header("authorization", "Bearer admin-secret")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&rule).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["reasonCode"], "X402_UPSTREAM_BLOCKED");
}
