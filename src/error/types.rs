use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: a trace backend is required")]
    MissingBackend,

    #[error("Metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Tracing error: {0}")]
    Tracing(#[from] opentelemetry::trace::TraceError),

    #[error("Request span missing: is the tracing middleware installed?")]
    MissingRequestSpan,

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Don't expose internal error details
        let body = match &self {
            Error::Internal(_) => "Internal error".to_string(),
            _ => self.to_string(),
        };

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
