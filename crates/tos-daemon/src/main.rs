//! tos-daemon entry point.
//!
//! Sets up tracing, loads config, connects the order store, wires middleware
//! and starts the HTTP server. Handlers live in `routes.rs`; shared state in
//! `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tos_daemon::{routes, state};
use tos_db::PgOrderStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    init_tracing();

    let loaded = tos_config::load_from_env().context("config load failed")?;
    let cfg = loaded.service;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let db_url = cfg.database_url()?;
    let pool = tos_db::connect(
        &db_url,
        cfg.database.max_connections,
        cfg.database.acquire_timeout(),
    )
    .await?;
    if cfg.database.run_migrations {
        tos_db::migrate(&pool).await?;
    }
    info!("order store connected");

    let shared = Arc::new(state::AppState::new(
        Arc::new(PgOrderStore::new(pool)),
        cfg.subscribers.send_timeout(),
    ));

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors(&cfg.server.allowed_origins));

    let addr = cfg.bind_addr()?;
    info!("tos-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    info!("tos-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
