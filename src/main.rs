use devgate::config::Config;
use devgate::proxy::DevServer;
use devgate::reload::{ReloadHub, ReloadWatcher};
use devgate::{PKG_NAME, VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("devgate.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Wire up live reload
    let hub = ReloadHub::new();
    let watcher = ReloadWatcher::spawn(&config.reload.watch, config.reload.delay(), hub.clone())?;
    if watcher.is_none() {
        info!("No reload watch paths configured, live reload is inactive");
    }

    // Bind first so an occupied port fails startup instead of a background task
    let server = DevServer::new(&config, hub, shutdown_rx)?;
    let bound = server.bind().await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = bound.serve().await {
            error!(error = %e, "Dev server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server to drain (with timeout)
    let _ = shutdown_tx.send(true);
    drop(watcher);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting dev server");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        asset_base = %config.server.asset_base(),
        asset_root = %config.server.asset_root.display(),
        "Server configuration"
    );
    info!(
        target = %config.proxy.target,
        retry_delay_ms = config.proxy.retry_delay_ms,
        "Proxy configuration"
    );
    info!(
        watch = ?config.reload.watch,
        delay_ms = config.reload.delay_ms,
        "Reload configuration"
    );
}
