pub mod capture;
pub mod metrics;
pub mod tracing;

pub use capture::{capture_response, CaptureBody, ResponseCapture};
pub use metrics::{
    track_duration, track_in_flight, track_requests, track_response_size, RouterMetricsExt,
};
pub use tracing::{trace_request, RequestTracer, RequestTracerBuilder, RouterTracingExt};
