//! Response bodies that are not order records.
//!
//! Order records themselves are `tos_schemas::OrderRecord`; these types only
//! cover health and error payloads.

use serde::{Deserialize, Serialize};

/// GET /
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
}

/// GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Body of every 4xx/5xx from the order routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
