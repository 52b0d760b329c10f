//! Test utilities and common code for integration tests
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use opentelemetry::metrics::{
    InstrumentBuilder, InstrumentProvider, Meter, MeterProvider, SyncInstrument, UpDownCounter,
};
use opentelemetry::{InstrumentationScope, KeyValue, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One `add` call on a recorded instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct CounterEvent {
    pub instrument: String,
    pub delta: i64,
    pub attributes: Vec<KeyValue>,
}

impl CounterEvent {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentInfo {
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Default)]
struct Recorded {
    events: Mutex<Vec<CounterEvent>>,
    instruments: Mutex<Vec<InstrumentInfo>>,
}

/// A [`MeterProvider`] whose up/down counters keep every measurement.
#[derive(Clone, Debug, Default)]
pub struct RecordingMeterProvider {
    recorded: Arc<Recorded>,
}

impl RecordingMeterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CounterEvent> {
        self.recorded.events.lock().clone()
    }

    pub fn instruments(&self) -> Vec<InstrumentInfo> {
        self.recorded.instruments.lock().clone()
    }

    pub fn entries(&self) -> Vec<CounterEvent> {
        self.events().into_iter().filter(|e| e.delta > 0).collect()
    }

    pub fn exits(&self) -> Vec<CounterEvent> {
        self.events().into_iter().filter(|e| e.delta < 0).collect()
    }

    /// Sum of all deltas, i.e. the number of requests currently in flight.
    pub fn in_flight(&self) -> i64 {
        self.recorded.events.lock().iter().map(|e| e.delta).sum()
    }

    /// Waits until at least `count` entries were recorded.
    pub async fn wait_for_entries(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.entries().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("entries were not recorded in time");
    }
}

impl MeterProvider for RecordingMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(RecordingInstruments {
            recorded: self.recorded.clone(),
        }))
    }
}

struct RecordingInstruments {
    recorded: Arc<Recorded>,
}

impl InstrumentProvider for RecordingInstruments {
    fn i64_up_down_counter(
        &self,
        builder: InstrumentBuilder<'_, UpDownCounter<i64>>,
    ) -> UpDownCounter<i64> {
        let name = builder.name.to_string();
        self.recorded.instruments.lock().push(InstrumentInfo {
            name: name.clone(),
            description: builder.description.map(|d| d.to_string()),
            unit: builder.unit.map(|u| u.to_string()),
        });

        UpDownCounter::new(Arc::new(RecordingCounter {
            name,
            recorded: self.recorded.clone(),
        }))
    }
}

struct RecordingCounter {
    name: String,
    recorded: Arc<Recorded>,
}

impl SyncInstrument<i64> for RecordingCounter {
    fn measure(&self, measurement: i64, attributes: &[KeyValue]) {
        self.recorded.events.lock().push(CounterEvent {
            instrument: self.name.clone(),
            delta: measurement,
            attributes: attributes.to_vec(),
        });
    }
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("valid test request")
}

pub fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("valid test response")
}

/// Extractor used by the tests: path and request id header.
pub fn test_attributes(request: &Request<Body>) -> Vec<KeyValue> {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
        .to_owned();

    vec![
        KeyValue::new("http.path", request.uri().path().to_owned()),
        KeyValue::new("request.id", request_id),
    ]
}
