// Account service HTTP server
// Decision: Stops on Ctrl-C, or on ENTER when STOP_ON_ENTER is set, then stops the entity actors

use account_api::shutdown::shutdown_signal;
use account_api::{boot, AppConfig};
use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json switches to structured log lines
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "account_api=debug,account_runtime=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    tracing::info!("account-service starting...");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        storage = config.storage.as_str(),
        journal_dir = %config.journal_dir.display(),
        "Configuration loaded"
    );

    let context = boot::build(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address()))?;
    tracing::info!("Server listening at http://{}/", config.bind_address());
    if config.stop_on_enter {
        tracing::info!("Press ENTER to stop");
    }

    axum::serve(listener, context.router)
        .with_graceful_shutdown(shutdown_signal(config.stop_on_enter))
        .await
        .context("Server error")?;

    context.manager.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}
