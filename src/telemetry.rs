//! Structured logging bootstrap (`[AMBIENT] Logging`, `SPEC_FULL.md`).
//!
//! Keeps the `tracing_subscriber`/`EnvFilter` half of the teacher's `Telemetry`, dropping
//! the OpenTelemetry OTLP exporter layers: OTEL export is orthogonal to the admission
//! pipeline, and the teacher itself gates it behind a `telemetry` feature.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global `tracing` subscriber. Must be called once, before any other
/// logging happens, as the teacher's `main.rs` does with `Telemetry::new()...register()`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
