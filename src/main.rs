use std::sync::Arc;

use clap::Parser;
use uplink_core::PushMode;
use uplink_server::{PushHandler, ServerConfig, SessionRegistry};

#[derive(Parser)]
#[command(name = "uplink", about = "Server-side push channel layer")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9092)]
    port: u16,

    /// Per-channel send queue bound.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Starting uplink push server");

    let registry = Arc::new(SessionRegistry::new());
    let handler = Arc::new(PushHandler::new(Arc::clone(&registry)));

    let config = ServerConfig {
        port: args.port,
        max_send_queue: args.max_send_queue,
        default_push_mode: PushMode::Automatic,
    };
    let handle = uplink_server::start(config, registry, handler)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "uplink server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}
