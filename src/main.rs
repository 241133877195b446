use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use site_monitor::api;
use site_monitor::config::{load_sites, Settings};
use site_monitor::engine::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_ansi(true)
        .init();

    let settings = Settings::parse();

    let sites = load_sites(&settings.config)
        .with_context(|| format!("Failed to load sites from {}", settings.config.display()))?;
    if sites.is_empty() {
        warn!("Site list is empty; the API will serve empty arrays");
    }
    info!("{} site(s) to monitor", sites.len());

    let monitor = Arc::new(
        Monitor::new(sites, settings.monitor_config()).context("Failed to build HTTP client")?,
    );
    let shutdown = CancellationToken::new();

    let monitor_task = Arc::clone(&monitor).spawn(shutdown.clone());
    let mut server = tokio::spawn(api::start_server(
        settings.port,
        Arc::clone(&monitor),
        shutdown.clone(),
    ));

    tokio::select! {
        res = shutdown_signal() => res.context("Failed to install signal handlers")?,
        res = &mut server => {
            shutdown.cancel();
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("API server stopped unexpectedly"),
                Err(e) => Err(e).context("API server task failed"),
            };
        }
    }

    shutdown.cancel();

    let grace = Duration::from_secs(settings.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        match server.await {
            Ok(Err(e)) => error!("API server error during shutdown: {}", e),
            Err(e) => error!("API server task failed: {}", e),
            Ok(Ok(())) => {}
        }
        if let Err(e) = monitor_task.await {
            error!("Monitor task failed: {}", e);
        }
    })
    .await;

    match drained {
        Ok(()) => info!("Site monitor stopped cleanly"),
        Err(_) => warn!(
            grace_secs = settings.shutdown_grace_secs,
            "Shutdown grace period elapsed with tasks still running"
        ),
    }
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}
