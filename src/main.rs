//! Campus Sim Server binary.
//!
//! Loads configuration from the environment, wires the shared collaborators,
//! and serves WebSocket game sessions until interrupted.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use campus_sim::config::Settings;
use campus_sim::content;
use campus_sim::network::server::{AppContext, GameServer};
use campus_sim::network::session::ConnectionManager;
use campus_sim::store::kv::MemoryStore;
use campus_sim::store::save::SaveStore;
use campus_sim::world::balance::Balance;
use campus_sim::world::catalog::WorldCatalog;
use campus_sim::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    info!("Campus Sim Server v{VERSION}");
    info!("Listening on {}", settings.bind_addr);
    if !settings.auth_configured() {
        warn!("AUTH_SECRET is not set; every connection will be rejected");
    }

    let balance = Balance::load(&settings.world_dir.join("balance.json")).await;
    info!(
        "Tick interval {}s, player TTL {}s",
        balance.tick.interval_seconds,
        settings.player_ttl.as_secs()
    );

    let ctx = AppContext {
        store: MemoryStore::new(),
        manager: Arc::new(ConnectionManager::new()),
        catalog: Arc::new(WorldCatalog::new(&settings.world_dir)),
        balance: Arc::new(balance),
        content: content::from_settings(&settings),
        saves: Arc::new(SaveStore::new(settings.save_dir.clone())),
        settings,
    };

    let server = GameServer::new(ctx);
    server.run().await?;
    Ok(())
}
