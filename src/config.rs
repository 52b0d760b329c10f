use crate::error::InFlightError;
use crate::metrics::{METRIC_NAME_REQUESTS_INFLIGHT, validate_instrument_name};
use crate::middleware::recorder::DEFAULT_POOL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    // Server configuration
    pub listen_addr: String,
    pub request_timeout: Duration,
    pub service_name: String,

    // In-flight instrumentation
    pub metric_name: String,
    pub client_errors_are_failures: bool,
    pub recorder_pool_capacity: usize,

    // Operational configuration
    pub debug_mode: bool,
    pub log_format: LogFormat,
    pub log_level: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Default,
    Json,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            request_timeout: Duration::from_secs(30),
            service_name: env!("CARGO_PKG_NAME").to_string(),
            metric_name: METRIC_NAME_REQUESTS_INFLIGHT.to_string(),
            client_errors_are_failures: true,
            recorder_pool_capacity: DEFAULT_POOL_CAPACITY,
            debug_mode: false,
            log_format: LogFormat::Default,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        // Basic configuration
        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Ok(timeout) = std::env::var("REQUEST_TIMEOUT") {
            config.request_timeout = Duration::from_secs(timeout.parse()?);
        }

        if let Ok(name) = std::env::var("SERVICE_NAME") {
            config.service_name = name;
        }

        // In-flight instrumentation
        if let Ok(name) = std::env::var("INFLIGHT_METRIC_NAME") {
            config.metric_name = name;
        }

        if let Ok(enabled) = std::env::var("INFLIGHT_CLIENT_ERRORS_ARE_FAILURES") {
            config.client_errors_are_failures = enabled.parse()?;
        }

        if let Ok(capacity) = std::env::var("INFLIGHT_POOL_CAPACITY") {
            config.recorder_pool_capacity = capacity.parse()?;
        }

        // Operational configuration
        if let Ok(debug) = std::env::var("INFLIGHT_DEBUG") {
            config.debug_mode = debug.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Default,
            };
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InFlightError> {
        if self.service_name.trim().is_empty() {
            return Err(InFlightError::Configuration(
                "SERVICE_NAME must not be empty".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(InFlightError::Configuration(
                "REQUEST_TIMEOUT must be greater than zero".to_string(),
            ));
        }

        if self.recorder_pool_capacity == 0 {
            return Err(InFlightError::Configuration(
                "INFLIGHT_POOL_CAPACITY must be greater than zero".to_string(),
            ));
        }

        validate_instrument_name(&self.metric_name)?;

        Ok(())
    }
}
