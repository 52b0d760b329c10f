use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InFlightError {
    #[error("Invalid instrument {name:?}: {reason}")]
    InvalidInstrument { name: String, reason: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics exporter error: {0}")]
    Exporter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for InFlightError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            InFlightError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            InFlightError::InvalidInstrument { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_instrument")
            }
            InFlightError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
            InFlightError::Exporter(_) => (StatusCode::INTERNAL_SERVER_ERROR, "exporter_error"),
            InFlightError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}
