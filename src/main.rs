//! provider-sentinel
//!
//! Tracks the health of upstream LLM providers and gates inbound traffic.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ throttle middleware ──▶ provider views
//!                          │                 │
//!                          │          global → IP → API key
//!                          │
//!                          ▼
//!                    health checker ──── per-provider circuit breaker
//!                          │
//!                   periodic sweep ────▶ GET <endpoint><path> on every provider
//!
//!     Cross-cutting: config (+ hot reload), observability, lifecycle
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tokio::net::TcpListener;

use provider_sentinel::config::loader::load_config;
use provider_sentinel::config::watcher::ConfigWatcher;
use provider_sentinel::lifecycle::signals::wait_for_shutdown_signal;
use provider_sentinel::observability::{logging, metrics};
use provider_sentinel::{HttpServer, ServiceConfig, Services, Shutdown};

#[derive(Parser)]
#[command(name = "provider-sentinel", version, about = "LLM provider health and admission control", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "provider-sentinel starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        providers = config.providers.len(),
        failure_threshold = config.breaker.failure_threshold,
        open_timeout_ms = config.breaker.open_timeout_ms,
        health_interval_secs = config.health_check.interval_secs,
        rate_limiting = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let services = Arc::new(Services::new(config)?);
    services.start();

    // The notify handle must stay alive for events to flow.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            spawn_reload_loop(services.clone(), updates);
            Some(handle)
        }
        None => None,
    };

    let server_shutdown = Shutdown::new();
    let server = HttpServer::new(services.app_state());
    let mut server_task = tokio::spawn(server.run(listener, server_shutdown.wait()));

    tokio::select! {
        res = &mut server_task => report_server_exit(res),
        _ = wait_for_shutdown_signal() => {
            server_shutdown.trigger();
            report_server_exit(server_task.await);
        }
    }

    services.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn spawn_reload_loop(
    services: Arc<Services>,
    mut updates: tokio::sync::mpsc::UnboundedReceiver<ServiceConfig>,
) {
    let mut stop = services.shutdown_handle().subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                update = updates.recv() => match update {
                    Some(new_config) => {
                        services.apply_reload(new_config);
                    }
                    None => break,
                },
            }
        }
    });
}

fn report_server_exit(res: Result<Result<(), std::io::Error>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }
}
