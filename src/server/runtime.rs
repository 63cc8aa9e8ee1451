use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::handlers::{get_user, health};
use crate::config::ServerConfig;
use crate::middleware::{RequestTracer, RouterMetricsExt, RouterTracingExt};
use crate::observability::MetricsRegistry;

/// Create the Axum router with all middleware and routes
///
/// Tracing is the outermost layer so a panic anywhere below it, the metrics
/// middlewares included, still yields a traced `500`.
pub fn create_router(tracer: RequestTracer, registry: MetricsRegistry) -> Router {
    Router::new()
        .route("/users/{id}", get(get_user))
        .route("/health", get(health))
        .with_http_metrics(registry)
        .with_request_tracing(tracer)
}

/// Bind to the configured address and serve until SIGINT/SIGTERM.
pub async fn start_server(config: &ServerConfig, app: Router) -> Result<()> {
    let bind_addr = format!("{}:{}", config.bind, config.port);
    info!("Attempting to bind to {}", bind_addr);

    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {}: {}. Is another process using this port?", bind_addr, e)
    })?;
    info!("Server successfully bound to {}", bind_addr);

    serve_with_shutdown(
        listener,
        app,
        Duration::from_secs(config.shutdown_timeout),
        shutdown_signal(),
    )
    .await
}

/// Serve `app` on `listener` until `signal` resolves, then give in-flight
/// requests up to `grace` to finish.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    app: Router,
    grace: Duration,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    let trigger = shutdown.clone();

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        signal.await;
        trigger.notify_one();
    })
    .into_future();

    let deadline = async {
        shutdown.notified().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out, dropping open connections");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
