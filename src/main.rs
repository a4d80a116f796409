// src/main.rs
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

use lifeline::{
    checks::AlwaysHealthy,
    config::{self, Settings},
    health::{CheckCategory, HealthRegistry},
    lifecycle::{LifecycleConfig, LifecycleManager, ShutdownOutcome},
    metrics::MetricsRegistry,
    server::{CatchPanicLayer, ConnectionTimeouts, HealthService, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lifeline=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LIFELINE_CONFIG").ok())
        .map(PathBuf::from);
    let settings = config::load_settings(config_path.as_deref())?;

    if let Err(err) = config::validate(&settings).await {
        error!("Configuration validation failed: {}", err);
        return Err(err).context("configuration validation failed");
    }

    let outcome = match run(settings).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{:#}", err);
            return Err(err);
        }
    };

    match outcome {
        ShutdownOutcome::Graceful => info!("Server shutdown complete"),
        ShutdownOutcome::TimedOut => warn!("Server shutdown complete after forced close"),
    }

    Ok(())
}

async fn run(settings: Settings) -> Result<ShutdownOutcome> {
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);

    let registry = HealthRegistry::new(&settings.service.name, &settings.service.version)
        .with_metrics(metrics.collector());
    registry.register_liveness("handlers", AlwaysHealthy);
    registry.register_liveness("server", AlwaysHealthy);
    config::register_checks(&settings.checks, &registry)?;
    let registry = Arc::new(registry);

    info!(
        liveness = ?registry.check_names(CheckCategory::Liveness),
        readiness = ?registry.check_names(CheckCategory::Readiness),
        "Health checks registered"
    );

    let handler = ServiceBuilder::new()
        .layer(CatchPanicLayer::new().with_metrics(metrics.collector()))
        .service(HealthService::new(registry).with_metrics(metrics.clone()));

    let addr = settings.server.socket_addr()?;
    let server = ServerBuilder::new(addr)
        .with_handler(handler)
        .with_metrics(metrics.collector())
        .with_timeouts(ConnectionTimeouts {
            header_read: settings.server.read_timeout(),
            idle: settings.server.idle_timeout(),
        })
        .build()?;

    let manager = LifecycleManager::new(server, LifecycleConfig::from(&settings.lifecycle));
    Ok(manager.run().await?)
}
