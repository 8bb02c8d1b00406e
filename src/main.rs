//! Connect Four Server
//!
//! Authoritative game server: owns every board, clock, and room code;
//! clients are thin views over the state it broadcasts.

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use connect4::network::server::{GameServer, ServerConfig};
use connect4::VERSION;

#[tokio::main]
async fn main() {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Connect Four Server v{}", VERSION);

    let config = ServerConfig::default();
    info!("Starting WebSocket server on {}", config.bind_addr);

    let server = GameServer::new(config);

    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
    }
}
