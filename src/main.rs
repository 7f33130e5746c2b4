use std::sync::Arc;

use recserve::{config::ServerConfig, routes::create_router, server::PowerServer, state::AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let address = format!("{}:{}", config.host, config.port);

    let server = Arc::new(PowerServer::from_config(config)?);
    if !server.start().await {
        anyhow::bail!("Server failed to start");
    }

    let app = create_router(AppState::new(server.clone()));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    server.shutdown().await;
    Ok(())
}
