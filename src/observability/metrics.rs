//! HTTP metric names, labels and cardinality control
//!
//! Four aggregates are kept per registry:
//! - `http_requests_in_flight` (gauge)
//! - `http_requests_total` (counter)
//! - `request_duration_seconds` (histogram)
//! - `response_size_bytes` (histogram)
//!
//! The last three are labeled by `handler`, `code` and `method`.
//!
//! # Cardinality Control
//!
//! With the raw request path as `handler` every distinct URL creates a new
//! series, so path parameters make the label space unbounded. The
//! [`CardinalityLimiter`] keeps the first `max_path_labels` paths and folds
//! the rest into `"other"`. Using the matched route template
//! ([`PathLabel::MatchedRoute`]) keeps the label space as small as the router.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{MatchedPath, Request};
use axum::http::{Method, StatusCode};
use tokio::sync::RwLock;

use crate::config::PathLabel;

pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";
pub const RESPONSE_SIZE_BYTES: &str = "response_size_bytes";

/// Label value used once the path limit is reached.
pub const OVERFLOW_LABEL: &str = "other";

/// Cardinality limiter to prevent metric explosion
pub struct CardinalityLimiter {
    max_labels: usize,
    labels: Arc<RwLock<HashSet<String>>>,
}

impl CardinalityLimiter {
    pub fn new(max_labels: usize) -> Self {
        Self {
            max_labels,
            labels: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Get the label for `value`, returning "other" if over the limit
    pub async fn label(&self, value: &str) -> String {
        if self.labels.read().await.contains(value) {
            return value.to_string();
        }

        let mut labels = self.labels.write().await;
        // Another request may have inserted it between the two locks.
        if labels.contains(value) || labels.len() < self.max_labels {
            labels.insert(value.to_string());
            return value.to_string();
        }

        OVERFLOW_LABEL.to_string()
    }

    pub async fn label_count(&self) -> usize {
        self.labels.read().await.len()
    }
}

/// Request attributes captured before the request is handed downstream.
#[derive(Debug, Clone)]
pub struct RequestLabels {
    pub method: Method,
    pub path: String,
}

impl RequestLabels {
    pub fn from_request(request: &Request, source: PathLabel) -> Self {
        let path = match source {
            PathLabel::Raw => None,
            PathLabel::MatchedRoute => request
                .extensions()
                .get::<MatchedPath>()
                .map(|matched| matched.as_str().to_string()),
        }
        .unwrap_or_else(|| request.uri().path().to_string());

        Self {
            method: request.method().clone(),
            path,
        }
    }
}

/// Label set of one observation: `{handler, code, method}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    pub handler: String,
    pub code: String,
    pub method: String,
}

impl MetricLabels {
    pub fn new(handler: impl Into<String>, status: StatusCode, method: &Method) -> Self {
        Self {
            handler: handler.into(),
            code: status.as_u16().to_string(),
            method: method.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn test_cardinality_limiter() {
        let limiter = CardinalityLimiter::new(3);

        assert_eq!(limiter.label("/users/1").await, "/users/1");
        assert_eq!(limiter.label("/users/2").await, "/users/2");
        assert_eq!(limiter.label("/users/3").await, "/users/3");

        // already tracked values keep working at the limit
        assert_eq!(limiter.label("/users/1").await, "/users/1");

        assert_eq!(limiter.label("/users/4").await, OVERFLOW_LABEL);
        assert_eq!(limiter.label("/users/5").await, OVERFLOW_LABEL);

        assert_eq!(limiter.label_count().await, 3);
    }

    #[tokio::test]
    async fn test_cardinality_limiter_concurrent_access() {
        let limiter = Arc::new(CardinalityLimiter::new(5));
        let mut handles = vec![];

        for i in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.label(&format!("/items/{}", i)).await
            }));
        }

        let mut results = HashSet::new();
        for handle in handles {
            results.insert(handle.await.unwrap());
        }

        assert_eq!(results.len(), 6); // 5 paths + "other"
        assert!(results.contains(OVERFLOW_LABEL));
        assert_eq!(limiter.label_count().await, 5);
    }

    #[test]
    fn test_request_labels_fall_back_to_raw_path() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/users/42?verbose=1")
            .body(Body::empty())
            .unwrap();

        let labels = RequestLabels::from_request(&request, PathLabel::MatchedRoute);
        assert_eq!(labels.path, "/users/42");
        assert_eq!(labels.method, Method::POST);
    }

    #[test]
    fn test_metric_labels_use_exact_status() {
        let labels = MetricLabels::new("/users/1", StatusCode::NOT_FOUND, &Method::GET);
        assert_eq!(labels.code, "404");
        assert_eq!(labels.method, "GET");
    }
}
