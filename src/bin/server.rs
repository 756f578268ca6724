use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use manta_webapi::{
    auth::identity::MahiClient,
    config::AppConfig,
    metadata::ShardedKvClient,
    picker::Picker,
    routes::create_router,
    shark::HttpShark,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "manta-webapi",
        mahi_base_url = %config.redacted_mahi_base_url(),
        metadata_base_url = %config.metadata_base_url,
        "loaded configuration"
    );

    let identity = Arc::new(MahiClient::from_config(&config)?);
    let metadata = Arc::new(ShardedKvClient::from_config(&config)?);
    let picker = Arc::new(Picker::new(&config));
    let shark = Arc::new(HttpShark::new(std::time::Duration::from_secs(
        config.shark_request_timeout_secs,
    ))?);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(config, identity, metadata, picker, shark);
    state.spawn_picker_refresh();

    let router = create_router(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler");
    }
    tracing::info!("received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
