use std::net::SocketAddr;
use std::sync::Arc;

use streamgate::common::types::AnyResult;
use streamgate::configs::Config;
use streamgate::server::{self, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    streamgate::common::logger::init(&config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState::new(config)?);
    info!(
        "providers registered: {}",
        state.providers.provider_ids().join(", ")
    );

    let app = server::router(state);

    info!("streamgate listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
