use std::env;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use lumina_backend::config::AppPaths;
use lumina_backend::logging;
use lumina_backend::server;
use lumina_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let state = AppState::initialize(paths).await?;

    match state.provider.health_check().await {
        Ok(true) => tracing::info!("Generation provider '{}' reachable", state.provider.name()),
        Ok(false) | Err(_) => tracing::warn!(
            "Generation provider '{}' not reachable; answers will degrade to fallbacks",
            state.provider.name()
        ),
    }

    match state.index.count().await {
        Ok(0) => tracing::warn!(
            "Document collection is empty; run the ingestion job before serving real traffic"
        ),
        Ok(count) => tracing::info!("Document collection holds {} documents", count),
        Err(err) => tracing::error!("Failed to count documents: {}", err),
    }

    // Drop conversations that idled out while the process was down.
    state.conversations.sweep_expired().await;

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("{}:{}", state.settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state.clone());

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
