//! Prometheus scrape endpoint
//!
//! Serves the registry in the text exposition format. Rendering only reads the
//! aggregates. When the registry has an IP allowlist, clients outside it get
//! `403 Forbidden`.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use super::recorder::MetricsRegistry;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics endpoint handler with IP allowlist security
pub async fn metrics_endpoint(State(registry): State<MetricsRegistry>, request: Request) -> Response {
    if registry.config().ip_allowlist.is_some() {
        let client_ip = client_ip(request.headers(), request.extensions().get::<ConnectInfo<SocketAddr>>());

        if !client_ip.as_deref().is_some_and(|ip| registry.is_ip_allowed(ip)) {
            tracing::warn!(
                client_ip = client_ip.as_deref().unwrap_or("unknown"),
                "Metrics access denied: IP not in allowlist"
            );
            return (StatusCode::FORBIDDEN, "Access denied: IP not authorized").into_response();
        }
    }

    let body = registry.render();

    tracing::debug!(metrics_size = body.len(), "Metrics served");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Client address from proxy headers, falling back to the connection peer.
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    // X-Forwarded-For lists the original client first
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let first = first.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return Some(real_ip.trim().to_string());
    }

    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use axum::{body::Body, routing::get, Router};
    use axum::http::HeaderValue;
    use std::net::{IpAddr, Ipv4Addr};
    use tower::ServiceExt;

    fn router(config: MetricsConfig) -> Router {
        let registry = MetricsRegistry::new(&config).unwrap();
        Router::new()
            .route("/metrics", get(metrics_endpoint))
            .with_state(registry)
    }

    fn scrape(peer: Option<[u8; 4]>, forwarded_for: Option<&'static str>) -> axum::http::Request<Body> {
        let mut request = axum::http::Request::builder().uri("/metrics");
        if let Some(value) = forwarded_for {
            request = request.header("x-forwarded-for", value);
        }
        let mut request = request.body(Body::empty()).unwrap();
        if let Some(ip) = peer {
            let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 40000);
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[tokio::test]
    async fn test_scrape_serves_exposition_format() {
        let response = router(MetricsConfig::default())
            .oneshot(scrape(None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], EXPOSITION_CONTENT_TYPE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("http_requests_in_flight"));
    }

    #[tokio::test]
    async fn test_allowlist_checks_peer_address() {
        let config = MetricsConfig {
            ip_allowlist: Some(vec!["127.0.0.1".to_string()]),
            ..Default::default()
        };

        let allowed = router(config.clone())
            .oneshot(scrape(Some([127, 0, 0, 1]), None))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let denied = router(config.clone())
            .oneshot(scrape(Some([192, 168, 1, 1]), None))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        // no way to identify the client
        let unknown = router(config).oneshot(scrape(None, None)).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_allowlist_prefers_forwarded_for() {
        let config = MetricsConfig {
            ip_allowlist: Some(vec!["10.0.0.1".to_string()]),
            ..Default::default()
        };

        let response = router(config)
            .oneshot(scrape(Some([192, 168, 1, 1]), Some("10.0.0.1, 192.168.1.1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_client_ip_resolution_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.1"));
        assert_eq!(client_ip(&headers, None).as_deref(), Some("192.168.1.1"));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers, None).as_deref(), Some("172.16.0.1"));

        headers.clear();
        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(client_ip(&headers, Some(&peer)).as_deref(), Some("127.0.0.1"));
        assert_eq!(client_ip(&headers, None), None);
    }
}
