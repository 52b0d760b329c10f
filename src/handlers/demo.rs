use crate::error::InFlightError;
use axum::{extract::Path, http::StatusCode};
use std::time::Duration;

const MAX_DELAY_MILLIS: u64 = 60_000;

pub async fn index() -> &'static str {
    "requests-inflight demo server\n"
}

/// Responds with an empty body and the requested status.
pub async fn respond_with_status(Path(code): Path<u16>) -> Result<StatusCode, InFlightError> {
    StatusCode::from_u16(code)
        .map_err(|_| InFlightError::InvalidRequest(format!("{code} is not a valid status code")))
}

/// Holds the request open for `millis` milliseconds.
pub async fn delay(Path(millis): Path<u64>) -> Result<String, InFlightError> {
    if millis > MAX_DELAY_MILLIS {
        return Err(InFlightError::InvalidRequest(format!(
            "delay must be at most {MAX_DELAY_MILLIS}ms"
        )));
    }

    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(format!("slept {millis}ms\n"))
}
