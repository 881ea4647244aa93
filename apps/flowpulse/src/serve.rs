use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use flowpulse_relay::{RelayState, UpstreamClientConfig, WreqUpstreamClient, relay_router};

use crate::bootstrap::relay_config;
use crate::cli::ServeArgs;

pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = relay_config(args)?;
    info!(
        host = %config.host,
        port = config.port,
        upstream_url = %config.upstream_url,
        model = %config.model,
        proxy = %config.proxy.as_deref().unwrap_or(""),
        functions = config.functions.len(),
        "config loaded"
    );

    let upstream = WreqUpstreamClient::new(UpstreamClientConfig::from_global(&config))
        .context("build upstream client")?;
    let bind = config.bind_addr();
    let app = relay_router(RelayState::new(config, Arc::new(upstream)));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve relay")?;
    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
