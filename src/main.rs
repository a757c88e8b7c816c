use std::sync::Arc;

use drawfield::config::Config;
use drawfield::state::AppState;
use drawfield::storage::MemoryStorage;
use drawfield::{routes, services};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let port = config.port;

    // Storage is an injected seam; the in-process default keeps chunks for
    // the lifetime of the server only.
    let storage = Arc::new(MemoryStorage::new());
    let state = AppState::new(config, storage);

    // Background sweeps: dirty-chunk flush and idle-space reclaim.
    let _persistence = services::persistence::spawn_persistence_task(state.clone());
    let _reclaim = services::spaces::spawn_reclaim_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "drawfield listening");
    axum::serve(listener, app).await.expect("server failed");
}
