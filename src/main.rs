//! Relay process entry point: loads configuration, starts the peer
//! transport, and waits for a shutdown signal.

use cdp_relay::config::Config;
use cdp_relay::server::{serve, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn init_tracing(log_level: &str) {
    let level = log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Periodic housekeeping (logging-only; the registry and peer pool are
/// kept correct synchronously by the router and the socket handlers).
fn spawn_housekeeping(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            info!(
                targets = state.registry.len(),
                cdp_peers = state.clients.len(),
                extension_connected = state.extension_slot.is_connected(),
                "housekeeping sweep"
            );
        }
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    info!("cdp-relay v{}", cdp_relay::VERSION);
    info!(host = %config.host, port = config.port, "configuration loaded");

    let state = AppState::new(Arc::new(config));
    spawn_housekeeping(state.clone());

    if let Err(e) = serve(state, shutdown_signal()).await {
        warn!(error = %e, "relay exited with an error");
        return Err(e.into());
    }

    info!("relay shutdown complete");
    Ok(())
}
