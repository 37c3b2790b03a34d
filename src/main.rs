use anyhow::{Context, Result};
use modcore::api::create_app;
use modcore::config::{load_config, CoreConfig};
use modcore::Core;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modcore=info".into()),
        )
        .init();

    info!("Modcore starting...");

    // Config path: first argument, else MODCORE_CONFIG, else built-in defaults
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MODCORE_CONFIG").ok());
    let config = match config_path {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            load_config(&path)?
        }
        None => CoreConfig::default(),
    }
    .with_env_overrides();

    if config.server.admin_token.is_none() {
        warn!("No admin token configured; /api/admin is unrestricted");
    }

    info!(
        bind = %config.server.bind,
        max_events = config.events.max_events,
        route_prefix = %config.gateway.route_prefix,
        sqlite_path = ?config.storage.sqlite_path,
        "Configuration loaded"
    );

    let bind = config.server.bind.clone();
    let core = Core::new(config).context("Failed to initialize core")?;
    core.start().context("Failed to start core")?;

    let router = create_app(core.clone()).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(bind = %bind, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    let deactivated = core.stop();
    info!(deactivated = deactivated.len(), "Modcore stopped");

    Ok(())
}
