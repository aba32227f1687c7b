use anyhow::Context;

use tokenledger_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tokenledger_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(backend = %config.ledger.backend, "starting token service");

    let app = tokenledger_api::app::build_app(&config)
        .await
        .context("failed to initialise services")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
