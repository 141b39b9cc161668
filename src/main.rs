//! Crashtide Game Server
//!
//! Authoritative server for the crash wagering game. Drives the
//! round loop and serves WebSocket clients.

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crashtide::game::engine::EngineConfig;
use crashtide::network::server::{GameServer, ServerConfig};
use crashtide::store::{spawn_store_task, TracingStore};
use crashtide::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut server_config = ServerConfig::default();
    if let Ok(addr) = std::env::var("CRASHTIDE_BIND") {
        server_config.bind_addr = addr.parse()?;
    }

    let mut engine_config = EngineConfig::default();
    if let Ok(edge) = std::env::var("CRASHTIDE_EDGE_BPS") {
        engine_config.edge_bps = edge.parse()?;
    }

    info!("Crashtide Server v{}", VERSION);
    info!("Bind Address: {}", server_config.bind_addr);
    info!(
        "House Edge: {} bps, tick every {:?}",
        engine_config.edge_bps, engine_config.tick_interval
    );

    let (store_tx, _store_handle) = spawn_store_task(TracingStore);

    let server = GameServer::new(server_config, engine_config, store_tx);
    server.run().await?;

    Ok(())
}
