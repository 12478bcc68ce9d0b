use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    // stdout carries the protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let server = forecast_mcp::server();
    info!(
        "{} {} listening on stdio",
        forecast_mcp::SERVER_NAME,
        forecast_mcp::SERVER_VERSION
    );
    server.serve_stdio().await?;
    Ok(())
}
