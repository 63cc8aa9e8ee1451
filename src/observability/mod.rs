//! Observability module for tracing and metrics
//!
//! - OpenTelemetry tracing behind the [`TraceBackend`] seam, with request and
//!   child spans and W3C trace context propagation
//! - Prometheus metrics kept in per-registry recorders with cardinality controls
//! - Telemetry bootstrap for the server binary

pub mod backend;
pub mod endpoint;
pub mod init;
pub mod metrics;
pub mod propagation;
pub mod recorder;
pub mod span;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::TraceBackend;
pub use endpoint::metrics_endpoint;
pub use init::{build_tracer_provider, init_telemetry, TelemetryGuard};
pub use metrics::{CardinalityLimiter, MetricLabels, RequestLabels};
pub use propagation::{extract_trace_context, inject_trace_context};
pub use recorder::{InFlightGuard, MetricsRegistry};
pub use span::{child_span, child_span_in, ChildSpan, RequestSpan};
