//! Demo host serving a note board over the svchost protocol.
//!
//! ```sh
//! SVCHOST_ADDR=127.0.0.1:8080 cargo run -p echo-host
//! curl localhost:8080/notes
//! curl -X POST localhost:8080/notes/post -d '{"$args": ["first note"]}'
//! curl -H 'If-None-Match: <hash>' -H 'Prefer: wait=30' localhost:8080/notes
//! ```

mod config;
mod services;

use services::{EchoHost, NoteBoard, SystemClock};
use std::sync::Arc;
use svchost_runtime::metrics::MetricsServer;
use svchost_runtime::{Registration, RetryPolicy, ServiceRegistry};
use svchost_web::{HostConfig, HostServer};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,svchost_runtime=debug,svchost_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting echo host");

    let host = HostConfig::from_env()?;
    let config = config::from_env()?;
    info!(
        addr = %host.addr(),
        listen = %config["listen"],
        production = host.core().production(),
        "Configuration loaded"
    );

    if let Ok(addr) = std::env::var("SVCHOST_METRICS_ADDR") {
        let mut metrics = MetricsServer::new(addr.parse()?);
        metrics.start()?;
    }

    let registry = Arc::new(ServiceRegistry::with_retry_policy(RetryPolicy::from_env()));
    registry
        .register(Registration::batch([
            Registration::instance(Arc::new(SystemClock::new())),
            Registration::factory(NoteBoard::factory()),
            Registration::factory(EchoHost::factory()),
        ]))
        .await?;
    info!(services = ?registry.names(), "Services registered");

    registry.config_all(&config).await?;
    registry.init_all().await?;
    registry.run_all().await?;

    let server = HostServer::from_config_with(Arc::clone(&registry), &config, host)?;
    server.serve(shutdown_signal()).await?;

    info!("Echo host stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
