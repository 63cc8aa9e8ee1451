//! Request-scoped spans and child spans for internal operations.

use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use opentelemetry::trace::{SpanContext, SpanKind, TraceContextExt, TraceId};
use opentelemetry::{Context, KeyValue};

use super::backend::TraceBackend;
use crate::error::Error;

/// The span opened for the current request.
///
/// The tracing middleware stores it in the request extensions; handlers take
/// it as an extractor. It is a derived value: the incoming request's own
/// context is left untouched.
#[derive(Clone)]
pub struct RequestSpan {
    cx: Context,
    backend: Arc<dyn TraceBackend>,
}

impl RequestSpan {
    pub(crate) fn new(cx: Context, backend: Arc<dyn TraceBackend>) -> Self {
        Self { cx, backend }
    }

    /// OpenTelemetry context holding the request span.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    pub fn is_sampled(&self) -> bool {
        self.cx.span().span_context().is_sampled()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name, attributes);
    }

    /// Open a child span for a sub-operation of this request.
    #[track_caller]
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> ChildSpan {
        child_span(self.backend.as_ref(), &self.cx, name)
    }

    /// Like [`child`](Self::child), with `function` prefixed to the caller
    /// tag. Pass [`function_name!`](crate::function_name).
    #[track_caller]
    pub fn child_in(&self, function: &str, name: impl Into<Cow<'static, str>>) -> ChildSpan {
        child_span_in(self.backend.as_ref(), &self.cx, function, name)
    }
}

impl fmt::Debug for RequestSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSpan")
            .field("span_context", self.cx.span().span_context())
            .finish()
    }
}

impl<S> FromRequestParts<S> for RequestSpan
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestSpan>()
            .cloned()
            .ok_or(Error::MissingRequestSpan)
    }
}

/// A span for an internal operation. The owner ends it with [`ChildSpan::end`].
#[must_use = "a child span must be ended by its owner"]
#[derive(Debug)]
pub struct ChildSpan {
    cx: Context,
}

impl ChildSpan {
    /// Context carrying this span, for nesting further spans under it.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    pub fn end(self) {
        self.cx.span().end();
    }
}

/// Path of the enclosing function, e.g. `my_app::handlers::get_user`.
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        let name = ::std::any::type_name_of_val(&f);
        let name = name.strip_suffix("::f").unwrap_or(name);
        name.trim_end_matches("::{{closure}}")
    }};
}

/// Start a span named `name` under the span carried by `parent`.
///
/// A context without an active span yields a new root span instead of an
/// error. The span is tagged with its name and the `file#line` of the caller.
#[track_caller]
pub fn child_span(
    backend: &dyn TraceBackend,
    parent: &Context,
    name: impl Into<Cow<'static, str>>,
) -> ChildSpan {
    let caller = Location::caller();
    start_child(backend, parent, name.into(), format!("{}#{}", caller.file(), caller.line()))
}

/// [`child_span`] with a `function - file#line` caller tag.
#[track_caller]
pub fn child_span_in(
    backend: &dyn TraceBackend,
    parent: &Context,
    function: &str,
    name: impl Into<Cow<'static, str>>,
) -> ChildSpan {
    let caller = Location::caller();
    let tag = format!("{} - {}#{}", function, caller.file(), caller.line());
    start_child(backend, parent, name.into(), tag)
}

fn start_child(
    backend: &dyn TraceBackend,
    parent: &Context,
    name: Cow<'static, str>,
    caller: String,
) -> ChildSpan {
    if !parent.has_active_span() {
        tracing::debug!(span = %name, "No active span in context, starting a root span");
    }

    let attributes = vec![
        KeyValue::new("name", name.to_string()),
        KeyValue::new("caller", caller),
    ];

    ChildSpan {
        cx: backend.start_span(name, SpanKind::Internal, attributes, parent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::testing::{attribute, in_memory_tracer};
    use axum::http::Request;
    use opentelemetry::trace::{SpanId, TracerProvider};

    fn request_span(backend: Arc<dyn TraceBackend>) -> RequestSpan {
        let cx = backend.start_span("GET /orders".into(), SpanKind::Server, vec![], &Context::new());
        RequestSpan::new(cx, backend)
    }

    #[test]
    fn test_child_span_links_to_request_span() {
        let (provider, exporter) = in_memory_tracer();
        let span = request_span(Arc::new(provider.tracer("test")));

        let child = span.child("load_order");
        assert_eq!(child.span_context().trace_id(), span.trace_id());
        child.end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "load_order");
        assert_eq!(spans[0].span_kind, SpanKind::Internal);
        assert_eq!(spans[0].parent_span_id, span.span_context().span_id());
        assert_eq!(attribute(&spans[0], "name").as_deref(), Some("load_order"));
    }

    #[test]
    fn test_child_span_without_parent_starts_root() {
        let (provider, exporter) = in_memory_tracer();
        let tracer = provider.tracer("test");

        let child = child_span(&tracer, &Context::new(), "orphan");
        assert!(child.span_context().is_valid());
        child.end();

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].parent_span_id, SpanId::INVALID);
    }

    #[test]
    fn test_child_span_records_caller() {
        let (provider, exporter) = in_memory_tracer();
        let tracer = provider.tracer("test");

        let line = line!() + 1;
        let child = child_span(&tracer, &Context::new(), "with_caller");
        child.end();

        let spans = exporter.get_finished_spans().unwrap();
        let caller = attribute(&spans[0], "caller").unwrap();
        assert!(caller.ends_with(&format!("span.rs#{}", line)), "unexpected caller tag {caller}");
    }

    #[test]
    fn test_child_span_records_enclosing_function() {
        let (provider, exporter) = in_memory_tracer();
        let span = request_span(Arc::new(provider.tracer("test")));

        let line = line!() + 1;
        let child = span.child_in(crate::function_name!(), "named");
        child.end();

        let spans = exporter.get_finished_spans().unwrap();
        let caller = attribute(&spans[0], "caller").unwrap();
        let function = "request_telemetry::observability::span::tests::test_child_span_records_enclosing_function";
        assert!(caller.starts_with(&format!("{function} - ")), "unexpected caller tag {caller}");
        assert!(caller.ends_with(&format!("span.rs#{}", line)), "unexpected caller tag {caller}");
    }

    #[tokio::test]
    async fn test_function_name_strips_async_frames() {
        assert_eq!(
            crate::function_name!(),
            "request_telemetry::observability::span::tests::test_function_name_strips_async_frames"
        );
    }

    #[tokio::test]
    async fn test_extractor_requires_middleware() {
        let (mut parts, _) = Request::new(()).into_parts();
        let result = RequestSpan::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(Error::MissingRequestSpan)));
    }

    #[tokio::test]
    async fn test_extractor_reads_extensions() {
        let (provider, _exporter) = in_memory_tracer();
        let span = request_span(Arc::new(provider.tracer("test")));

        let mut request = Request::new(());
        request.extensions_mut().insert(span.clone());
        let (mut parts, _) = request.into_parts();

        let extracted = RequestSpan::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted.trace_id(), span.trace_id());
    }
}
