//! Trace context propagation over HTTP headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{global, Context};

/// Read-only view of request headers for propagators.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Writable view of outgoing headers for propagators.
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}

/// Extract the upstream span context, if the headers carry a valid one.
///
/// Returns `None` when nothing usable was found so callers start a root span
/// from an empty context rather than from whatever context happens to be
/// current.
pub fn remote_parent(propagator: &dyn TextMapPropagator, headers: &HeaderMap) -> Option<Context> {
    let cx = propagator.extract(&HeaderExtractor(headers));
    if cx.span().span_context().is_valid() {
        Some(cx)
    } else {
        None
    }
}

/// Extract trace context from HTTP headers with the global propagator.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Inject `cx` into outgoing HTTP headers with the global propagator.
pub fn inject_trace_context(cx: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(headers))
    });
}
