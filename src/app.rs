use crate::{
    error::InFlightError,
    handlers,
    middleware::inflight::{InFlightLayer, StatusOutcome},
    state::AppState,
};
use axum::Router;
use axum::http::StatusCode;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Builds the application router with the in-flight layer installed.
///
/// # Errors
///
/// Fails if the in-flight counter cannot be created; the server must not start then.
pub fn create_router(app_state: AppState) -> Result<Router, InFlightError> {
    let inflight = InFlightLayer::builder(&app_state.metrics.provider)
        .name(app_state.config.metric_name.clone())
        .pool(app_state.recorders.clone())
        .classify(StatusOutcome::new(
            app_state.config.client_errors_are_failures,
        ))
        .build()?;

    let timeout = app_state.config.request_timeout;

    let app = Router::new()
        .merge(handlers::routes())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        // Route-level so that `MatchedPath` is visible to the attribute extractor, and
        // outside the timeout so a timed-out request is recorded with its 408.
        .layer(inflight)
        // Outer layers (executed first on request, last on response)
        .layer(tower::ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    Ok(app.with_state(app_state))
}
