//! Prometheus metrics registry for the HTTP middleware
//!
//! A [`MetricsRegistry`] owns a Prometheus recorder that is *not* installed as
//! the process-wide recorder. Every middleware and the scrape endpoint receive
//! the registry they should use, so two apps (or two tests) in one process
//! never share series.

use std::sync::Arc;
use std::time::Duration;

use garde::Validate;
use metrics::{Gauge, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use super::metrics::{
    CardinalityLimiter, MetricLabels, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    REQUEST_DURATION_SECONDS, RESPONSE_SIZE_BYTES,
};
use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Shared handle to the HTTP metric aggregates.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    config: MetricsConfig,
    limiter: CardinalityLimiter,
    in_flight: Gauge,
}

impl MetricsRegistry {
    /// Validate `config`, then build the recorder and register metric
    /// descriptions and bucket layouts.
    pub fn new(config: &MetricsConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|report| Error::Config(report.to_string()))?;

        let mut builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                &config.duration_buckets,
            )?
            .set_buckets_for_metric(
                Matcher::Full(RESPONSE_SIZE_BYTES.to_string()),
                &config.size_buckets,
            )?;

        for (key, value) in &config.global_labels {
            builder = builder.add_global_label(key, value);
        }

        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        let in_flight = metrics::with_local_recorder(&recorder, || {
            describe_gauge!(
                HTTP_REQUESTS_IN_FLIGHT,
                "A gauge of requests currently being served by the wrapped handler."
            );
            describe_counter!(
                HTTP_REQUESTS_TOTAL,
                "A counter for requests to the wrapped handler."
            );
            describe_histogram!(
                REQUEST_DURATION_SECONDS,
                Unit::Seconds,
                "A histogram of latencies for requests."
            );
            describe_histogram!(
                RESPONSE_SIZE_BYTES,
                Unit::Bytes,
                "A histogram of response sizes for requests."
            );
            metrics::gauge!(HTTP_REQUESTS_IN_FLIGHT)
        });

        tracing::info!(
            endpoint = %config.endpoint_path,
            max_path_labels = %config.max_path_labels,
            "Prometheus metrics registry initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                recorder,
                handle,
                limiter: CardinalityLimiter::new(config.max_path_labels),
                config: config.clone(),
                in_flight,
            }),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.inner.config
    }

    pub fn cardinality_limiter(&self) -> &CardinalityLimiter {
        &self.inner.limiter
    }

    /// Render every aggregate in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Mark one request as in flight until the guard is dropped.
    pub fn in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.increment(1.0);
        InFlightGuard {
            gauge: self.inner.in_flight.clone(),
        }
    }

    pub fn record_request(&self, labels: &MetricLabels) {
        self.with_recorder(|| {
            metrics::counter!(
                HTTP_REQUESTS_TOTAL,
                "handler" => labels.handler.clone(),
                "code" => labels.code.clone(),
                "method" => labels.method.clone()
            )
            .increment(1);
        });
    }

    pub fn record_duration(&self, labels: &MetricLabels, elapsed: Duration) {
        self.with_recorder(|| {
            metrics::histogram!(
                REQUEST_DURATION_SECONDS,
                "handler" => labels.handler.clone(),
                "code" => labels.code.clone(),
                "method" => labels.method.clone()
            )
            .record(elapsed.as_secs_f64());
        });
    }

    pub fn record_response_size(&self, labels: &MetricLabels, bytes: u64) {
        self.with_recorder(|| {
            metrics::histogram!(
                RESPONSE_SIZE_BYTES,
                "handler" => labels.handler.clone(),
                "code" => labels.code.clone(),
                "method" => labels.method.clone()
            )
            .record(bytes as f64);
        });
    }

    /// Check if a client may scrape the registry
    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        match &self.inner.config.ip_allowlist {
            Some(allowlist) => allowlist.iter().any(|allowed| allowed == ip),
            None => true,
        }
    }

    fn with_recorder<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.inner.recorder, f)
    }
}

/// Decrements the in-flight gauge when dropped, including during unwinding.
#[must_use = "the request stops counting as in flight when the guard is dropped"]
pub struct InFlightGuard {
    gauge: Gauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
    }
}
