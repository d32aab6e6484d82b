use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tos_db::PersistenceError;
use tos_schemas::ValidationError;

use crate::api_types::ErrorResponse;

/// Failure of the create/list paths. Delivery failures never show up here.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Persistence(#[from] PersistenceError),
}

impl IntakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            IntakeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IntakeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}
