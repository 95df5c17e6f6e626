//! Mail queue admin server - HTTP surface over the queue.
//!
//! Serves queue statistics and entry listings, operator retry/cancel, and the
//! enqueue endpoints used by the signup flow and campaign fan-out.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use mailqueue::telemetry::{init_logging, shutdown_signal};
use mailqueue::web::router;
use mailqueue::{open_repository, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("admin_server_starting");

    // The admin server never sends mail, so SMTP settings are not required here
    let config = Config::from_lookup(|name| match name {
        "DRY_RUN" => Some("true".to_string()),
        _ => std::env::var(name).ok(),
    })
    .context("Invalid configuration")?;

    info!(
        port = config.port,
        admin_token_configured = config.admin_token.is_some(),
        database_url = %config.database_url,
        "config_loaded"
    );
    if config.admin_token.is_none() {
        warn!("admin_auth_not_configured");
    }

    let repo = open_repository(&config)
        .await
        .context("Failed to open queue database")?;

    let port = config.port;
    let app = router(AppState::new(config, repo));

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "admin_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("admin_server_shutting_down");
        })
        .await
        .context("Server error")?;

    info!("admin_server_shutdown_complete");

    Ok(())
}
