use crate::error::InFlightError;
use opentelemetry_sdk::{Resource, metrics::SdkMeterProvider};
use prometheus::{Encoder, Registry, TextEncoder};

/// Instrumentation scope used when the layer asks a provider for its meter.
pub const METER_NAME: &str = "requests-inflight";

pub const METRIC_NAME_REQUESTS_INFLIGHT: &str = "requests_inflight";
pub const METRIC_UNIT_REQUESTS_INFLIGHT: &str = "{count}";
pub const METRIC_DESC_REQUESTS_INFLIGHT: &str =
    "Measures the number of requests currently being processed by the server.";

pub const ATTR_STATUS_CODE: &str = "http.status_code";
pub const ATTR_RESPONSE_OUTCOME: &str = "http.response_outcome";

const MAX_NAME_LEN: usize = 255;
const MAX_UNIT_LEN: usize = 63;

/// Checks an instrument name against the OpenTelemetry naming rules.
///
/// The SDK only logs rejected names and hands out a no-op instrument.
pub fn validate_instrument_name(name: &str) -> Result<(), InFlightError> {
    let invalid = |reason| InFlightError::InvalidInstrument {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name must not be empty")),
        Some(first) if !first.is_ascii_alphabetic() => {
            return Err(invalid("name must start with an ASCII letter"));
        }
        Some(_) => {}
    }

    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 255 characters"));
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
        return Err(invalid(
            "name may only contain ASCII letters, digits, '_', '.', '-' and '/'",
        ));
    }

    Ok(())
}

pub fn validate_instrument_unit(name: &str, unit: &str) -> Result<(), InFlightError> {
    if unit.len() > MAX_UNIT_LEN || !unit.is_ascii() {
        return Err(InFlightError::InvalidInstrument {
            name: name.to_string(),
            reason: "unit must be ASCII and at most 63 characters",
        });
    }
    Ok(())
}

/// Meter provider exporting into a Prometheus registry, scraped through `/metrics`.
#[derive(Clone)]
pub struct MetricsExporter {
    pub provider: SdkMeterProvider,
    pub registry: Registry,
}

impl MetricsExporter {
    pub fn new(service_name: &str) -> Result<Self, InFlightError> {
        let registry = Registry::new();

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| InFlightError::Exporter(e.to_string()))?;

        let provider = SdkMeterProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .with_reader(exporter)
            .build();

        Ok(Self { provider, registry })
    }

    /// Renders every registered metric family in the Prometheus text format.
    pub fn encode(&self) -> Result<String, InFlightError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| InFlightError::Internal(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| InFlightError::Internal(format!("Failed to convert metrics to string: {e}")))
    }

    pub fn shutdown(&self) -> Result<(), InFlightError> {
        self.provider
            .shutdown()
            .map_err(|e| InFlightError::Exporter(e.to_string()))
    }
}
