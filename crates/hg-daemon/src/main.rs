//! hg-daemon entry point.
//!
//! Thin on purpose: tracing, startup wiring, middleware, serve. Handlers live
//! in `routes.rs`, shared state in `state.rs`, construction in `wiring.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{header, HeaderName, HeaderValue, Method};
use hg_daemon::{routes, state, wiring};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // Any config, secret or DB failure here is fatal: the daemon never
    // serves verifications on a half-built pipeline.
    let services = wiring::bootstrap(&wiring::config_paths_from_env()).await?;
    let pool = services.pool.clone();

    let shared = Arc::new(state::AppState::new(
        services.orchestrator,
        services.config.operator_principal.clone(),
    ));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(5));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("hg-daemon listening on http://{}", addr);

    let served = axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed");

    pool.close().await;
    info!("hg-daemon stopped; database pool closed");
    served
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("HG_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Dev front-end origins. The production proxy is same-origin.
const DEV_ORIGINS: [&str; 4] = [
    "http://localhost",
    "http://127.0.0.1",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

fn cors_localhost_only() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(DEV_ORIGINS.map(HeaderValue::from_static))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(routes::PRINCIPAL_HEADER)])
}
