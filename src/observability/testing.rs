//! Shared test helpers. The integration tests compile this file too.

use opentelemetry::Value;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::{InMemorySpanExporter, InMemorySpanExporterBuilder};
use opentelemetry_sdk::trace::TracerProvider;

/// A tracer provider that exports synchronously into memory.
pub fn in_memory_tracer() -> (TracerProvider, InMemorySpanExporter) {
    let exporter = InMemorySpanExporterBuilder::new().build();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    (provider, exporter)
}

/// String form of a span attribute.
pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| match &kv.value {
            Value::String(s) => s.as_str().to_string(),
            other => other.to_string(),
        })
}

/// Value of the first exposition line for metric `name` that contains every
/// fragment, e.g. `sample(&rendered, "http_requests_total", &["code=\"200\""])`.
pub fn sample(rendered: &str, name: &str, fragments: &[&str]) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            line.strip_prefix(name)
                .is_some_and(|rest| rest.starts_with('{') || rest.starts_with(' '))
        })
        .find(|line| fragments.iter().all(|f| line.contains(f)))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
