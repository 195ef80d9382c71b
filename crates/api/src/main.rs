use anyhow::Context;

use ferrobank_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config comes first: it decides the log format.
    let config = AppConfig::from_env().context("failed to load configuration")?;
    ferrobank_observability::init(config.log_format);
    tracing::info!(?config, "configuration loaded");

    let services = ferrobank_api::app::build_services(&config)
        .await
        .context("failed to build services")?;
    let app = ferrobank_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.http_server_address)
        .await
        .with_context(|| format!("failed to bind {}", config.http_server_address))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
