//! HTTP metrics middleware
//!
//! Four independent middlewares, one per aggregate. They can be used alone
//! or all together through [`RouterMetricsExt::with_http_metrics`].

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};

use crate::config::PathLabel;
use crate::middleware::capture::capture_response;
use crate::observability::endpoint::metrics_endpoint;
use crate::observability::metrics::{MetricLabels, RequestLabels};
use crate::observability::recorder::MetricsRegistry;

/// Count the request as in flight until its response body is finished.
///
/// The guard also drops if the handler panics or the request is cancelled.
pub async fn track_in_flight(
    State(registry): State<MetricsRegistry>,
    request: Request,
    next: Next,
) -> Response {
    let guard = registry.in_flight();
    let response = next.run(request).await;

    capture_response(response, move |_| drop(guard))
}

/// Observe the time from entry until the response head is available.
pub async fn track_duration(
    State(registry): State<MetricsRegistry>,
    request: Request,
    next: Next,
) -> Response {
    let request_labels = RequestLabels::from_request(&request, registry.config().path_label);
    let start = Instant::now();

    let response = next.run(request).await;

    let labels = observation_labels(&registry, &request_labels, response.status()).await;
    registry.record_duration(&labels, start.elapsed());
    response
}

pub async fn track_requests(
    State(registry): State<MetricsRegistry>,
    request: Request,
    next: Next,
) -> Response {
    let request_labels = RequestLabels::from_request(&request, registry.config().path_label);

    let response = next.run(request).await;

    let labels = observation_labels(&registry, &request_labels, response.status()).await;
    registry.record_request(&labels);
    response
}

/// Observe the number of body bytes once the body has been delivered.
pub async fn track_response_size(
    State(registry): State<MetricsRegistry>,
    request: Request,
    next: Next,
) -> Response {
    let request_labels = RequestLabels::from_request(&request, registry.config().path_label);

    let response = next.run(request).await;

    let labels = observation_labels(&registry, &request_labels, response.status()).await;
    capture_response(response, move |capture| {
        registry.record_response_size(&labels, capture.bytes_written());
    })
}

async fn observation_labels(
    registry: &MetricsRegistry,
    request: &RequestLabels,
    status: StatusCode,
) -> MetricLabels {
    let handler = registry.cardinality_limiter().label(&request.path).await;
    MetricLabels::new(handler, status, &request.method)
}

/// Adds the scrape route and the four metrics middlewares to a router.
pub trait RouterMetricsExt {
    fn with_http_metrics(self, registry: MetricsRegistry) -> Self;
}

impl<S> RouterMetricsExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_http_metrics(self, registry: MetricsRegistry) -> Self {
        let endpoint_path = registry.config().endpoint_path.clone();

        let in_flight = middleware::from_fn_with_state(registry.clone(), track_in_flight);
        let duration = middleware::from_fn_with_state(registry.clone(), track_duration);
        let requests = middleware::from_fn_with_state(registry.clone(), track_requests);
        let size = middleware::from_fn_with_state(registry.clone(), track_response_size);

        // last layer is outermost; MatchedPath only exists inside the router
        let router = match registry.config().path_label {
            PathLabel::Raw => self
                .layer(size)
                .layer(requests)
                .layer(duration)
                .layer(in_flight),
            PathLabel::MatchedRoute => self
                .route_layer(size)
                .route_layer(requests)
                .route_layer(duration)
                .route_layer(in_flight),
        };

        // added after layering so scrapes are not measured
        router.route(&endpoint_path, get(metrics_endpoint).with_state(registry))
    }
}
