//! Gambit multiplayer chess server.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod protocol;
mod room;
mod server;
mod store;
mod sync;

use config::ServerConfig;
use server::ServerState;
use store::{FileStore, MemoryStore, SnapshotStore};
use sync::SessionSynchronizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;

    let store: Arc<dyn SnapshotStore> = match &config.snapshot_dir {
        Some(dir) => {
            info!("Storing snapshots in {}", dir.display());
            Arc::new(FileStore::new(dir.clone()))
        }
        None => {
            info!("Storing snapshots in memory");
            Arc::new(MemoryStore::new())
        }
    };

    info!("Starting Gambit server...");

    let sync = Arc::new(SessionSynchronizer::new(store, config.save_retry_backoff));
    let state = Arc::new(ServerState::new(sync));

    server::run_server(config.addr, state).await
}
