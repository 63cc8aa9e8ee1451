pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::*;
pub use error::*;
pub use server::*;

use crate::middleware::RequestTracer;
use crate::observability::MetricsRegistry;

/// Main server entry point for library usage
pub async fn run_server() -> anyhow::Result<()> {
    let app_config = config::load_config()?;

    // Flushes pending spans when dropped at the end of this function
    let telemetry = observability::init_telemetry(
        &app_config.logging,
        &app_config.tracing,
        app_config.environment,
    )?;

    ::tracing::info!(
        environment = app_config.environment.as_str(),
        "request-telemetry starting up"
    );

    let tracer = RequestTracer::from_config(telemetry.tracer(), &app_config.tracing);
    let registry = MetricsRegistry::new(&app_config.metrics)?;

    let app = server::create_router(tracer, registry);
    server::start_server(&app_config.server, app).await?;

    Ok(())
}
