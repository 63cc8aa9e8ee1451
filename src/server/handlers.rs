use axum::{extract::Path, Json};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::debug;

use crate::observability::RequestSpan;

#[derive(Debug, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

/// `GET /users/{id}`. The lookup runs in its own child span.
pub async fn get_user(Path(id): Path<u64>, span: RequestSpan) -> Json<User> {
    let lookup = span.child_in(crate::function_name!(), "load_user");
    lookup.set_attribute(KeyValue::new("user.id", id as i64));

    let user = User {
        id,
        name: format!("user-{id}"),
    };
    debug!(user_id = id, "User loaded");

    lookup.end();
    Json(user)
}

/// Liveness probe at /health
pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{RequestTracer, RouterTracingExt};
    use crate::observability::testing::{attribute, in_memory_tracer};
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use opentelemetry::trace::TracerProvider as _;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }

    #[tokio::test]
    async fn test_get_user_opens_lookup_span() {
        let (provider, exporter) = in_memory_tracer();
        let app = Router::new()
            .route("/users/{id}", get(get_user))
            .with_request_tracing(RequestTracer::new(provider.tracer("handlers-test")));

        let request = axum::http::Request::builder()
            .uri("/users/9")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let user: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(user["id"], 9);
        assert_eq!(user["name"], "user-9");

        let spans = exporter.get_finished_spans().unwrap();
        let lookup = spans.iter().find(|s| s.name == "load_user").unwrap();
        assert_eq!(attribute(lookup, "user.id").as_deref(), Some("9"));
        let caller = attribute(lookup, "caller").unwrap();
        assert!(caller.starts_with("request_telemetry::server::handlers::get_user - "), "{caller}");
        assert!(caller.contains("handlers.rs#"));
    }

    #[tokio::test]
    async fn test_get_user_without_tracing_is_an_error() {
        let app = Router::new().route("/users/{id}", get(get_user));

        let request = axum::http::Request::builder()
            .uri("/users/9")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
