#[tokio::main]
async fn main() {
    if let Err(e) = request_telemetry::run_server().await {
        eprintln!("request-telemetry failed: {e:#}");
        std::process::exit(1);
    }
}
