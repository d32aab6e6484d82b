//! Axum router and all HTTP handlers for tos-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests in `tests/` drive the bare router.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tos_schemas::{OrderDraft, OrderRecord, ValidationError};
use tracing::warn;

use crate::{
    api_types::{HealthResponse, RootResponse},
    error::IntakeError,
    state::AppState,
    ws,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/orders", get(list_orders).post(create_order))
        .route("/ws/orders", get(subscribe))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /  and  GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn root() -> impl IntoResponse {
    Json(RootResponse {
        message: "Trade Order System is running".to_string(),
    })
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /orders
// ---------------------------------------------------------------------------

/// Create an order and push it to every live subscriber.
///
/// The response carries the stored record as soon as the insert commits; the
/// fan-out continues in the background.
pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    payload: Result<Json<OrderDraft>, JsonRejection>,
) -> Result<Json<OrderRecord>, IntakeError> {
    let Json(draft) = payload.map_err(|rej| {
        let detail = rej.body_text();
        warn!(%detail, "order payload rejected");
        IntakeError::Validation(ValidationError::Malformed(detail))
    })?;

    let ack = st.intake.create(draft).await?;
    Ok(Json(ack.record))
}

// ---------------------------------------------------------------------------
// GET /orders
// ---------------------------------------------------------------------------

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
) -> Result<Json<Vec<OrderRecord>>, IntakeError> {
    Ok(Json(st.intake.list().await?))
}

// ---------------------------------------------------------------------------
// GET /ws/orders
// ---------------------------------------------------------------------------

pub(crate) async fn subscribe(State(st): State<Arc<AppState>>, upgrade: WebSocketUpgrade) -> Response {
    let registry = Arc::clone(&st.registry);
    upgrade.on_upgrade(move |socket| ws::serve_subscriber(socket, registry))
}
