// src/main.rs
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use api_gateway::{
    config,
    metrics::MetricsRegistry,
    proxy::Gateway,
    server::{admin::AdminState, start_admin_server, RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_gateway=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    let gateway = Arc::new(
        Gateway::new(&config, Some(metrics)).context("Failed to register gateway routes")?,
    );

    if config.metrics.enabled {
        let admin_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        let state = AdminState {
            metrics: metrics_registry,
            breakers: gateway.breakers().clone(),
            metrics_path: Arc::from(config.metrics.path.as_str()),
        };
        start_admin_server(admin_addr, state).await?;
    }

    let handler = RequestHandler::new(gateway);

    info!("Starting API gateway on {}", config.listen);
    ServerBuilder::new(config.listen)
        .with_handler(handler)
        .serve(shutdown_signal())
        .await?;

    info!("API gateway stopped");
    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
