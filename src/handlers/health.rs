use crate::{error::InFlightError, state::AppState};
use axum::{Json, extract::State};
use serde_json::json;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "recorders": {
            "outstanding": state.recorders.outstanding(),
            "idle": state.recorders.idle(),
            "capacity": state.recorders.capacity()
        }
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, InFlightError> {
    state.metrics.encode()
}
