//! Measure the number of in-flight requests.
//!
//! A request is in flight from the moment [`InFlightService`] is called until its response
//! body has been fully produced, dropped, or the call failed. Entry records `+1` with the
//! attributes extracted from the request; exit records `-1` with the same attributes plus
//! `http.status_code` and `http.response_outcome`.
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use opentelemetry_sdk::metrics::SdkMeterProvider;
//! use requests_inflight::middleware::inflight::InFlightLayer;
//!
//! # fn main() -> Result<(), requests_inflight::InFlightError> {
//! let provider = SdkMeterProvider::builder().build();
//! let layer = InFlightLayer::builder(&provider).build()?;
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(layer);
//! # Ok(())
//! # }
//! ```

use crate::error::InFlightError;
use crate::metrics::{
    ATTR_RESPONSE_OUTCOME, ATTR_STATUS_CODE, METER_NAME, METRIC_DESC_REQUESTS_INFLIGHT,
    METRIC_NAME_REQUESTS_INFLIGHT, METRIC_UNIT_REQUESTS_INFLIGHT, validate_instrument_name,
    validate_instrument_unit,
};
use crate::middleware::recorder::{PooledRecorder, RecorderPool};
use axum::extract::MatchedPath;
use axum::http::{Request, Response, StatusCode, Version};
use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{MeterProvider, UpDownCounter};
use pin_project_lite::pin_project;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tower::{Layer, Service};
use tracing::{info, trace};

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

/// Derives the base attribute set from a request.
///
/// Called once per request, before the inner service runs. Must not have side effects.
pub trait RequestAttributes<B> {
    fn attributes(&self, request: &Request<B>) -> Vec<KeyValue>;
}

impl<B, F> RequestAttributes<B> for F
where
    F: Fn(&Request<B>) -> Vec<KeyValue>,
{
    fn attributes(&self, request: &Request<B>) -> Vec<KeyValue> {
        self(request)
    }
}

/// Method, matched route and protocol version of the request.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultAttributes;

impl<B> RequestAttributes<B> for DefaultAttributes {
    fn attributes(&self, request: &Request<B>) -> Vec<KeyValue> {
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_owned())
            .unwrap_or_else(|| "unmatched".to_owned());

        vec![
            KeyValue::new("http.request.method", request.method().as_str().to_owned()),
            KeyValue::new("http.route", route),
            KeyValue::new(
                "network.protocol.version",
                protocol_version(request.version()),
            ),
        ]
    }
}

fn protocol_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "unknown",
    }
}

/// Maps a final status code to an outcome label.
pub trait ClassifyOutcome {
    fn classify(&self, status: StatusCode) -> &'static str;
}

impl<F> ClassifyOutcome for F
where
    F: Fn(StatusCode) -> &'static str,
{
    fn classify(&self, status: StatusCode) -> &'static str {
        self(status)
    }
}

/// Server errors are failures; client errors are failures unless disabled.
#[derive(Clone, Copy, Debug)]
pub struct StatusOutcome {
    client_errors_are_failures: bool,
}

impl Default for StatusOutcome {
    fn default() -> Self {
        Self {
            client_errors_are_failures: true,
        }
    }
}

impl StatusOutcome {
    pub fn new(client_errors_are_failures: bool) -> Self {
        Self {
            client_errors_are_failures,
        }
    }
}

impl ClassifyOutcome for StatusOutcome {
    fn classify(&self, status: StatusCode) -> &'static str {
        if status.is_server_error() || (self.client_errors_are_failures && status.is_client_error())
        {
            OUTCOME_FAILURE
        } else {
            OUTCOME_SUCCESS
        }
    }
}

/// Builder for [`InFlightLayer`].
pub struct InFlightLayerBuilder<'a, P, OnRequest = DefaultAttributes, Classify = StatusOutcome>
where
    P: ?Sized,
{
    provider: &'a P,
    name: Cow<'static, str>,
    pool: Option<RecorderPool>,
    on_request: OnRequest,
    classify: Classify,
}

impl<'a, P, OnRequest, Classify> InFlightLayerBuilder<'a, P, OnRequest, Classify>
where
    P: MeterProvider + ?Sized,
{
    /// Overrides the instrument name.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Uses `pool` for response recorders instead of a private one.
    #[must_use]
    pub fn pool(mut self, pool: RecorderPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the extractor for the base attribute set.
    #[must_use]
    pub fn on_request<T>(self, on_request: T) -> InFlightLayerBuilder<'a, P, T, Classify> {
        InFlightLayerBuilder {
            provider: self.provider,
            name: self.name,
            pool: self.pool,
            on_request,
            classify: self.classify,
        }
    }

    /// Sets the status code classifier.
    #[must_use]
    pub fn classify<T>(self, classify: T) -> InFlightLayerBuilder<'a, P, OnRequest, T> {
        InFlightLayerBuilder {
            provider: self.provider,
            name: self.name,
            pool: self.pool,
            on_request: self.on_request,
            classify,
        }
    }

    /// Creates the counter instrument.
    ///
    /// # Errors
    ///
    /// Returns [`InFlightError::InvalidInstrument`] if the instrument name or unit is not
    /// accepted by OpenTelemetry. Callers are expected to abort startup on this error.
    pub fn build(self) -> Result<InFlightLayer<OnRequest, Classify>, InFlightError> {
        validate_instrument_name(&self.name)?;
        validate_instrument_unit(&self.name, METRIC_UNIT_REQUESTS_INFLIGHT)?;

        let counter = self
            .provider
            .meter(METER_NAME)
            .i64_up_down_counter(self.name.clone())
            .with_description(METRIC_DESC_REQUESTS_INFLIGHT)
            .with_unit(METRIC_UNIT_REQUESTS_INFLIGHT)
            .build();

        let pool = self.pool.unwrap_or_default();
        info!(
            metric = %self.name,
            pool_capacity = pool.capacity(),
            "Registered in-flight request counter"
        );

        Ok(InFlightLayer {
            counter,
            pool,
            on_request: self.on_request,
            classify: self.classify,
        })
    }
}

/// A [`Layer`] that records the number of in-flight requests.
#[derive(Clone, Debug)]
pub struct InFlightLayer<OnRequest = DefaultAttributes, Classify = StatusOutcome> {
    counter: UpDownCounter<i64>,
    pool: RecorderPool,
    on_request: OnRequest,
    classify: Classify,
}

impl InFlightLayer {
    pub fn builder<P>(provider: &P) -> InFlightLayerBuilder<'_, P>
    where
        P: MeterProvider + ?Sized,
    {
        InFlightLayerBuilder {
            provider,
            name: Cow::Borrowed(METRIC_NAME_REQUESTS_INFLIGHT),
            pool: None,
            on_request: DefaultAttributes,
            classify: StatusOutcome::default(),
        }
    }
}

impl<OnRequest, Classify> InFlightLayer<OnRequest, Classify> {
    pub fn pool(&self) -> &RecorderPool {
        &self.pool
    }
}

impl<S, OnRequest, Classify> Layer<S> for InFlightLayer<OnRequest, Classify>
where
    OnRequest: Clone,
    Classify: Clone,
{
    type Service = InFlightService<S, OnRequest, Classify>;

    fn layer(&self, inner: S) -> Self::Service {
        InFlightService {
            inner,
            counter: self.counter.clone(),
            pool: self.pool.clone(),
            on_request: self.on_request.clone(),
            classify: self.classify.clone(),
        }
    }
}

/// Middleware that records the number of in-flight requests.
#[derive(Clone, Debug)]
pub struct InFlightService<S, OnRequest = DefaultAttributes, Classify = StatusOutcome> {
    inner: S,
    counter: UpDownCounter<i64>,
    pool: RecorderPool,
    on_request: OnRequest,
    classify: Classify,
}

impl<S, OnRequest, Classify> InFlightService<S, OnRequest, Classify> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn pool(&self) -> &RecorderPool {
        &self.pool
    }
}

/// Holds a request's place in the counter. Dropping it records the exit.
struct InFlightGuard<Classify>
where
    Classify: ClassifyOutcome,
{
    counter: UpDownCounter<i64>,
    attributes: Vec<KeyValue>,
    recorder: PooledRecorder,
    classify: Classify,
}

impl<Classify> InFlightGuard<Classify>
where
    Classify: ClassifyOutcome,
{
    fn new(
        counter: UpDownCounter<i64>,
        attributes: Vec<KeyValue>,
        recorder: PooledRecorder,
        classify: Classify,
    ) -> Self {
        counter.add(1, &attributes);

        Self {
            counter,
            attributes,
            recorder,
            classify,
        }
    }
}

impl<Classify> Drop for InFlightGuard<Classify>
where
    Classify: ClassifyOutcome,
{
    fn drop(&mut self) {
        let status = self.recorder.status();
        let outcome = self.classify.classify(status);

        trace!(
            status = status.as_u16(),
            outcome,
            observed = self.recorder.is_observed(),
            bytes = self.recorder.bytes_written(),
            "Request left flight"
        );

        let attributes = self.recorder.final_attributes(
            &self.attributes,
            [
                KeyValue::new(ATTR_STATUS_CODE, i64::from(status.as_u16())),
                KeyValue::new(ATTR_RESPONSE_OUTCOME, outcome),
            ],
        );
        self.counter.add(-1, attributes);
        // `recorder` goes back to the pool when the fields drop.
    }
}

impl<S, ReqBody, ResBody, OnRequest, Classify> Service<Request<ReqBody>>
    for InFlightService<S, OnRequest, Classify>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    OnRequest: RequestAttributes<ReqBody>,
    Classify: ClassifyOutcome + Clone,
{
    type Response = Response<RecordingBody<ResBody, Classify>>;
    type Error = S::Error;
    type Future = InFlightFuture<S::Future, Classify>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let attributes = self.on_request.attributes(&req);
        let recorder = self.pool.acquire();

        // Entry is recorded before the inner service gets the request.
        let guard = InFlightGuard::new(
            self.counter.clone(),
            attributes,
            recorder,
            self.classify.clone(),
        );

        InFlightFuture {
            inner: self.inner.call(req),
            guard: Some(guard),
        }
    }
}

pin_project! {
    /// Response future for [`InFlightService`].
    pub struct InFlightFuture<F, Classify>
    where
        Classify: ClassifyOutcome,
    {
        #[pin]
        inner: F,
        guard: Option<InFlightGuard<Classify>>,
    }
}

impl<F, B, E, Classify> Future for InFlightFuture<F, Classify>
where
    F: Future<Output = Result<Response<B>, E>>,
    Classify: ClassifyOutcome,
{
    type Output = Result<Response<RecordingBody<B, Classify>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        // On `Err` the guard stays behind and records the exit when the future drops.
        let response = ready!(this.inner.poll(cx))?;

        let mut guard = this.guard.take();
        if let Some(guard) = guard.as_mut() {
            guard.recorder.write_header(response.status());
        }

        Poll::Ready(Ok(response.map(|inner| RecordingBody { inner, guard })))
    }
}

impl<F, Classify> fmt::Debug for InFlightFuture<F, Classify>
where
    Classify: ClassifyOutcome,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightFuture")
            .field("in_flight", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Response body for [`InFlightService`].
    ///
    /// Frames pass through untouched. The request leaves flight when the body reaches its
    /// end or is dropped.
    pub struct RecordingBody<B, Classify>
    where
        Classify: ClassifyOutcome,
    {
        #[pin]
        inner: B,
        guard: Option<InFlightGuard<Classify>>,
    }
}

impl<B, Classify> Body for RecordingBody<B, Classify>
where
    B: Body,
    Classify: ClassifyOutcome,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let (Some(data), Some(guard)) = (frame.data_ref(), this.guard.as_mut()) {
                    guard.recorder.write(data.remaining());
                }
            }
            // End of stream or a body error: the response is over.
            None | Some(Err(_)) => *this.guard = None,
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B, Classify> fmt::Debug for RecordingBody<B, Classify>
where
    B: fmt::Debug,
    Classify: ClassifyOutcome,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RecordingBody");
        debug.field("inner", &self.inner);
        if let Some(guard) = &self.guard {
            debug
                .field("status", &guard.recorder.status())
                .field("bytes_written", &guard.recorder.bytes_written());
        }
        debug.finish()
    }
}
