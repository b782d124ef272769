//! Playroom Server
//!
//! Room coordination and input relay for two-player browser games.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use playroom::{
    network::{AuthConfig, JwtAuthenticator, RoomServer},
    MemoryGameStore, ServerConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let auth = AuthConfig::from_env();
    if !auth.is_configured() {
        warn!("AUTH_SECRET / AUTH_PUBLIC_KEY_PEM not set; every auth request will be rejected");
    }

    info!("Playroom Server v{}", VERSION);
    info!(
        max_connections = config.max_connections,
        max_members = ?config.coordinator.max_members,
        idle_room_secs = config.idle_room_timeout.as_secs(),
        "Configuration loaded"
    );

    let server = RoomServer::new(
        config,
        Arc::new(JwtAuthenticator::new(auth)),
        Arc::new(MemoryGameStore::new()),
    );

    tokio::select! {
        result = server.run() => result.context("Server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
