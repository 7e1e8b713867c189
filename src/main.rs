//! x402 pay-per-request gateway entrypoint.
//!
//! Boots config, compiles the route table, wires the payment coordinator and admission
//! pipeline, then serves `GET /health`, `ALL /api/*`, and `/admin/routes` behind a single
//! axum `Router`, exactly the shape of the teacher's `main.rs` (dotenv -> telemetry ->
//! config -> router -> graceful shutdown).

use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_gateway::admin::{self, AdminState};
use x402_gateway::config::{self, CliArgs};
use x402_gateway::network::resolve_caip2;
use x402_gateway::payment::coordinator::PaymentCoordinator;
use x402_gateway::payment::facilitator_client::FacilitatorClient;
use x402_gateway::pipeline::PipelineState;
use x402_gateway::receipt::ReceiptStore;
use x402_gateway::replay_store::{self, ReplayStore};
use x402_gateway::route_table::{CompiledTable, RouteTable};
use x402_gateway::sig_down::SigDown;
use x402_gateway::spend_tracker::SpendTracker;
use x402_gateway::{handlers, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init();

    let cli = CliArgs::load().unwrap_or_else(|err| {
        tracing::error!(%err, "fatal configuration error");
        std::process::exit(1);
    });

    let routes = config::load_routes(&cli.routes_file).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to load routes file");
        std::process::exit(1);
    });
    let config_doc = config::load_config_doc(&cli.config_doc_file).unwrap_or_default();

    let compiled = CompiledTable::compile(routes).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to compile routes file");
        std::process::exit(1);
    });
    let route_table = Arc::new(RouteTable::new(compiled));

    let network_caip2 = resolve_caip2(&cli.base_network);
    let facilitator_client = FacilitatorClient::try_new(&cli.facilitator_url, None).unwrap_or_else(|err| {
        tracing::error!(%err, "invalid FACILITATOR_URL");
        std::process::exit(1);
    });
    let payment_coordinator = Arc::new(PaymentCoordinator::new(facilitator_client, network_caip2.clone()));
    for rule in route_table.snapshot().rules() {
        payment_coordinator.add_route(rule.clone());
    }
    route_table.subscribe(payment_coordinator.clone());

    let replay_store = Arc::new(ReplayStore::new(Duration::from_millis(cli.replay_ttl_ms)));
    let sig_down = SigDown::try_new()?;
    replay_store::spawn_sweeper(replay_store.clone(), sig_down.cancellation_token());

    let pipeline_state = Arc::new(PipelineState {
        route_table: route_table.clone(),
        replay_store,
        spend_tracker: Arc::new(SpendTracker::new()),
        receipt_store: Arc::new(ReceiptStore::new()),
        payment_coordinator,
        http_client: reqwest::Client::new(),
        network_caip2,
        pay_to_address: config_doc.pay_to_address.clone().unwrap_or(cli.pay_to_address.clone()),
        api_key: config_doc.api_key.clone().or(cli.api_key.clone()),
        agent_blocklist: Arc::new(RwLock::new(config_doc.agent_blocklist.clone())),
    });

    let admin_state = Arc::new(AdminState {
        pipeline: pipeline_state.clone(),
        admin_key: cli.admin_key.clone(),
        routes_file: cli.routes_file.clone(),
    });

    let app = handlers::routes(pipeline_state)
        .merge(admin::routes(admin_state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("starting x402 gateway on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|err| {
        tracing::error!(%err, "failed to bind {addr}");
        std::process::exit(1);
    });

    let cancellation_token = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await?;

    Ok(())
}
