#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use request_telemetry::config::MetricsConfig;
use request_telemetry::middleware::RequestTracer;
use request_telemetry::observability::MetricsRegistry;

#[path = "../../src/observability/testing.rs"]
mod testing;

pub use testing::{attribute, in_memory_tracer, sample};

pub const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

/// Tracer, registry and the handles needed to inspect what they recorded.
pub struct Telemetry {
    pub provider: TracerProvider,
    pub exporter: InMemorySpanExporter,
    pub tracer: RequestTracer,
    pub registry: MetricsRegistry,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::with_metrics(MetricsConfig::default())
    }

    pub fn with_metrics(config: MetricsConfig) -> Self {
        let (provider, exporter) = in_memory_tracer();
        let tracer = RequestTracer::new(provider.tracer("integration-test"));
        let registry = MetricsRegistry::new(&config).unwrap();

        Self {
            provider,
            exporter,
            tracer,
            registry,
        }
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap()
    }

    pub fn metric(&self, name: &str, fragments: &[&str]) -> Option<f64> {
        sample(&self.registry.render(), name, fragments)
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
