//! The seam between the request middleware and a tracing backend.
//!
//! The middleware only ever needs to start a span under a parent context; the
//! rest of the span lifecycle goes through the OpenTelemetry span API on the
//! returned [`Context`]. Every OpenTelemetry [`Tracer`] is a backend, so an
//! SDK tracer exporting over OTLP, a vendor tracer, or the global tracer can be
//! plugged in unchanged.

use std::borrow::Cow;

use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

/// A handle able to open spans on behalf of the middleware.
pub trait TraceBackend: Send + Sync + 'static {
    /// Start a span as a child of whatever span `parent` carries (a root span
    /// when it carries none) and return `parent` extended with the new span.
    fn start_span(
        &self,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Context;
}

impl<T> TraceBackend for T
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    fn start_span(
        &self,
        name: Cow<'static, str>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Context {
        let span = self
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(self, parent);

        parent.with_span(span)
    }
}
