pub mod demo;
pub mod health;

use crate::state::AppState;
use axum::{Router, routing::get};

pub fn routes() -> Router<AppState> {
    Router::new()
        // Demo endpoints
        .route("/", get(demo::index))
        .route("/status/:code", get(demo::respond_with_status))
        .route("/delay/:millis", get(demo::delay))
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics_handler))
}
