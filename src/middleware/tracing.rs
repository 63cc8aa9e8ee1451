//! Distributed tracing middleware for HTTP requests
//!
//! Every request gets exactly one server span. The span continues the trace
//! carried by the inbound `traceparent` header when there is one and starts a
//! new trace otherwise. Handler panics are converted into a `500` and recorded
//! on the span. The span is ended once the response body has been delivered,
//! or when the request is abandoned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use bytes::BytesMut;
use futures::{future, stream, FutureExt as _, StreamExt as _};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{FutureExt as _, SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Instrument;

use crate::config::{TracingConfig, DEFAULT_COMPONENT_NAME};
use crate::error::{Error, Result};
use crate::logging::{sanitize_header, sanitize_payload};
use crate::middleware::capture::{capture_response, ResponseCapture};
use crate::observability::backend::TraceBackend;
use crate::observability::propagation::remote_parent;
use crate::observability::span::RequestSpan;

/// Shared configuration of the tracing middleware.
#[derive(Clone)]
pub struct RequestTracer {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn TraceBackend>,
    propagator: Box<dyn TextMapPropagator + Send + Sync>,
    component_name: String,
    capture_headers: bool,
    capture_body: bool,
    max_body_bytes: usize,
}

impl RequestTracer {
    pub fn builder() -> RequestTracerBuilder {
        RequestTracerBuilder::default()
    }

    /// A tracer with default settings around `backend`.
    pub fn new(backend: impl TraceBackend) -> Self {
        Self::builder().assemble(Arc::new(backend))
    }

    /// A tracer around `backend` with the capture settings from `config`.
    pub fn from_config(backend: impl TraceBackend, config: &TracingConfig) -> Self {
        Self::builder()
            .component_name(config.component_name.clone())
            .capture_headers(config.capture_headers)
            .capture_body(config.capture_body)
            .max_body_bytes(config.max_body_bytes)
            .assemble(Arc::new(backend))
    }

    pub fn backend(&self) -> Arc<dyn TraceBackend> {
        self.inner.backend.clone()
    }

    pub fn component_name(&self) -> &str {
        &self.inner.component_name
    }
}

impl std::fmt::Debug for RequestTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracer")
            .field("component_name", &self.inner.component_name)
            .field("capture_headers", &self.inner.capture_headers)
            .field("capture_body", &self.inner.capture_body)
            .field("max_body_bytes", &self.inner.max_body_bytes)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestTracer`]. A backend is required.
pub struct RequestTracerBuilder {
    backend: Option<Arc<dyn TraceBackend>>,
    propagator: Option<Box<dyn TextMapPropagator + Send + Sync>>,
    component_name: Option<String>,
    capture_headers: bool,
    capture_body: bool,
    max_body_bytes: usize,
}

impl Default for RequestTracerBuilder {
    fn default() -> Self {
        let defaults = TracingConfig::default();
        Self {
            backend: None,
            propagator: None,
            component_name: None,
            capture_headers: defaults.capture_headers,
            capture_body: defaults.capture_body,
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

impl RequestTracerBuilder {
    pub fn backend(mut self, backend: impl TraceBackend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Value of the `component` tag. Empty names fall back to the default.
    pub fn component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    pub fn propagator(mut self, propagator: impl TextMapPropagator + Send + Sync + 'static) -> Self {
        self.propagator = Some(Box::new(propagator));
        self
    }

    pub fn capture_headers(mut self, enabled: bool) -> Self {
        self.capture_headers = enabled;
        self
    }

    pub fn capture_body(mut self, enabled: bool) -> Self {
        self.capture_body = enabled;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn build(mut self) -> Result<RequestTracer> {
        let backend = self.backend.take().ok_or(Error::MissingBackend)?;
        Ok(self.assemble(backend))
    }

    fn assemble(self, backend: Arc<dyn TraceBackend>) -> RequestTracer {
        let component_name = self
            .component_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_COMPONENT_NAME.to_string());

        let propagator = self
            .propagator
            .unwrap_or_else(|| Box::new(TraceContextPropagator::new()));

        RequestTracer {
            inner: Arc::new(Inner {
                backend,
                propagator,
                component_name,
                capture_headers: self.capture_headers,
                capture_body: self.capture_body,
                max_body_bytes: self.max_body_bytes,
            }),
        }
    }
}

/// Ends the request span when dropped.
struct SpanGuard(Context);

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.0.span().end();
    }
}

/// Middleware that opens the request span and records the outcome on it
pub async fn trace_request(
    State(tracer): State<RequestTracer>,
    mut request: Request,
    next: Next,
) -> Response {
    let inner = &tracer.inner;

    let parent = remote_parent(inner.propagator.as_ref(), request.headers()).unwrap_or_default();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let attributes = vec![
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.url", request.uri().to_string()),
        KeyValue::new("component", inner.component_name.clone()),
    ];

    let cx = inner.backend.start_span(
        format!("{method} {path}").into(),
        SpanKind::Server,
        attributes,
        &parent,
    );
    let guard = SpanGuard(cx.clone());

    let span = RequestSpan::new(cx.clone(), inner.backend.clone());
    let sampled = span.is_sampled();

    if sampled && inner.capture_headers {
        record_headers(&span, "http.request.header", request.headers());
    }
    if sampled && inner.capture_body {
        request = record_request_body(&span, request, inner.max_body_bytes).await;
    }

    request.extensions_mut().insert(span.clone());

    let log_span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        trace_id = %span.trace_id(),
    );

    let outcome = AssertUnwindSafe(
        next.run(request)
            .with_context(cx.clone())
            .instrument(log_span.clone()),
    )
    .catch_unwind()
    .await;

    let (response, panicked) = match outcome {
        Ok(response) => (response, false),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            record_panic(&span, &message);
            log_span.in_scope(|| {
                tracing::error!(panic = %message, "Request handler panicked");
            });
            (StatusCode::INTERNAL_SERVER_ERROR.into_response(), true)
        }
    };

    let capture_response_headers = sampled && inner.capture_headers;

    capture_response(response, move |capture| {
        record_outcome(&guard.0, capture, capture_response_headers, panicked);
        drop(guard);
    })
}

fn record_outcome(cx: &Context, capture: &ResponseCapture, with_headers: bool, panicked: bool) {
    let span = cx.span();
    let status = capture.status();

    span.set_attribute(KeyValue::new("http.status_code", i64::from(status.as_u16())));
    span.set_attribute(KeyValue::new("http.result", status_class(status)));
    span.set_attribute(KeyValue::new(
        "http.response_content_length",
        i64::try_from(capture.bytes_written()).unwrap_or(i64::MAX),
    ));

    if with_headers {
        for (name, value) in capture.headers() {
            let value = value.to_str().unwrap_or("<binary>");
            span.set_attribute(KeyValue::new(
                format!("http.response.header.{name}"),
                sanitize_header(name.as_str(), value),
            ));
        }
    }

    // a panic already set a more specific error status
    if status.is_server_error() && !panicked {
        span.set_status(Status::error(status_class(status)));
    }
}

fn record_headers(span: &RequestSpan, prefix: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = value.to_str().unwrap_or("<binary>");
        span.set_attribute(KeyValue::new(
            format!("{prefix}.{name}"),
            sanitize_header(name.as_str(), value),
        ));
    }
}

/// Buffer a declared, bounded request body onto the span and hand an
/// identical body downstream.
///
/// A body that fails or outgrows the limit while buffering is replayed to the
/// handler as received, error included, and is not attached.
async fn record_request_body(span: &RequestSpan, request: Request, max_bytes: usize) -> Request {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if !declared.is_some_and(|len| len > 0 && len <= max_bytes) {
        return request;
    }

    let (parts, body) = request.into_parts();
    let mut chunks = body.into_data_stream();
    let mut buffered = BytesMut::new();

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                buffered.extend_from_slice(&chunk);
                if buffered.len() > max_bytes {
                    tracing::debug!(max_bytes, "Request body exceeds capture limit, not attached");
                    let head = stream::once(future::ready(Ok(buffered.freeze())));
                    return Request::from_parts(parts, Body::from_stream(head.chain(chunks)));
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Request body failed while buffering for tracing");
                let replay = stream::iter([Ok(buffered.freeze()), Err(error)]);
                return Request::from_parts(parts, Body::from_stream(replay));
            }
        }
    }

    let bytes = buffered.freeze();
    span.set_attribute(KeyValue::new(
        "http.request.body",
        sanitize_payload(&String::from_utf8_lossy(&bytes)),
    ));
    Request::from_parts(parts, Body::from(bytes))
}

fn record_panic(span: &RequestSpan, message: &str) {
    let span_id = span.span_context().span_id().to_string();
    span.add_event(
        "exception",
        vec![
            KeyValue::new("exception.type", "panic"),
            KeyValue::new("exception.message", message.to_string()),
            KeyValue::new("trace.span_id", span_id),
        ],
    );
    span.context().span().set_status(Status::error(message.to_string()));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `HTTP 2xx` style status class.
fn status_class(status: StatusCode) -> String {
    format!("HTTP {}xx", status.as_u16() / 100)
}

/// Adds [`trace_request`] to a router.
pub trait RouterTracingExt {
    fn with_request_tracing(self, tracer: RequestTracer) -> Self;
}

impl<S> RouterTracingExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_request_tracing(self, tracer: RequestTracer) -> Self {
        self.layer(middleware::from_fn_with_state(tracer, trace_request))
    }
}
