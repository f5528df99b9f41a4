/**
 * LUMEN HUB - Relais entre lampadaires connectés et applis de supervision
 *
 * RÔLE : Bootstrap du hub : config, store durable, registre des connexions,
 * endpoint WebSocket et API REST d'administration.
 *
 * ARCHITECTURE : un `Hub` unique injecté dans les handlers WS et HTTP.
 * UTILITÉ : savoir quels lampadaires sont joignables, relayer commandes et
 * télémétrie, garder le statut persisté cohérent avec les connexions vivantes.
 */

mod config;
mod connection;
mod health;
mod http;
mod hub;
mod lifecycle;
mod models;
mod observers;
mod protocol;
mod registry;
mod router;
mod store;
mod ws;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::hub::{Hub, SharedHub};
use crate::store::LampStore;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lumen_hub=info")),
        )
        .init();

    // une tâche qui panique est loggée, le processus continue
    std::panic::set_hook(Box::new(|info| {
        error!("[hub] panic: {}", info);
    }));

    let cfg = load_config().await;
    info!("[hub] config: {:?}", cfg);

    let store = LampStore::open(&cfg.store_path)
        .await
        .with_context(|| format!("failed to open lamp store at {:?}", cfg.store_path))?;

    let hub: SharedHub = Arc::new(Hub::new(Arc::new(store), cfg.heartbeat_interval()));

    let health_tracker = HealthTracker::new();
    health_tracker.spawn_health_logger(hub.clone());

    let app = http::build_router(AppState { hub, health_tracker });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("[hub] listening on http://{addr} (ws: /ws)");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
