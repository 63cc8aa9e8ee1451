//! Observability initialization
//!
//! Builds the OpenTelemetry tracer provider the request middleware exports
//! through, installs it together with the W3C propagator, and sets up logging.
//! The returned [`TelemetryGuard`] flushes pending spans when dropped.

use std::time::Duration;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{Config, Sampler, Tracer, TracerProvider},
    Resource,
};

use crate::config::{Environment, LoggingConfig, TracingConfig};
use crate::error::Error;
use crate::logging::setup_tracing;

/// Keeps the tracer provider alive; flushes and shuts it down on drop.
pub struct TelemetryGuard {
    provider: TracerProvider,
    tracer: Tracer,
}

impl TelemetryGuard {
    /// Tracer for [`RequestTracer`](crate::middleware::RequestTracer).
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        for result in self.provider.force_flush() {
            if let Err(error) = result {
                tracing::warn!(error = %error, "Failed to flush spans on shutdown");
            }
        }
        global::shutdown_tracer_provider();
    }
}

/// Initialize logging and tracing for the process.
pub fn init_telemetry(
    logging: &LoggingConfig,
    tracing_config: &TracingConfig,
    environment: Environment,
) -> Result<TelemetryGuard> {
    setup_tracing(logging)?;

    let provider = build_tracer_provider(tracing_config, environment)?;
    let tracer = provider.tracer(tracing_config.service_name.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    tracing::info!(
        tracing_enabled = %tracing_config.enabled,
        otlp_endpoint = %tracing_config.otlp_endpoint,
        sample_rate = %tracing_config.sample_rate,
        environment = %environment.as_str(),
        "Telemetry initialized"
    );

    Ok(TelemetryGuard { provider, tracer })
}

/// Tracer provider with a parent-based ratio sampler and, when export is
/// enabled, an OTLP/gRPC batch exporter.
pub fn build_tracer_provider(
    config: &TracingConfig,
    environment: Environment,
) -> Result<TracerProvider, Error> {
    let trace_config = Config::default()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.sample_rate,
        ))))
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("environment", environment.as_str()),
        ]));

    let mut builder = TracerProvider::builder().with_config(trace_config);

    if config.enabled {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .with_timeout(Duration::from_secs(config.export_timeout_secs))
            .build_span_exporter()?;

        builder = builder.with_batch_exporter(exporter, runtime::Tokio);
    }

    Ok(builder.build())
}
