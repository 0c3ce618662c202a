use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use usage_api::backend::influx::InfluxBackend;
use usage_api::backend::timescale::{self, TimescaleBackend};
use usage_api::backend::TimeSeriesBackend;
use usage_api::config::{ApiConfig, BackendConfig};
use usage_api::state::{AppState, Clock};
use usage_api::{cli, routes};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind usage-api listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind usage-api listener on {addr}"))
        }
    }
}

fn build_backend(config: &ApiConfig) -> Result<Arc<dyn TimeSeriesBackend>> {
    Ok(match &config.backend {
        BackendConfig::Influx(influx) => Arc::new(InfluxBackend::new(
            influx,
            config.timezone,
            config.backend_timeout,
        )?),
        BackendConfig::Timescale(timescale) => {
            let pool = timescale::connect_lazy(timescale, config.backend_timeout)?;
            Arc::new(TimescaleBackend::new(pool, config.timezone))
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ApiConfig::from_env().context("failed to load configuration")?;
    let backend = build_backend(&config)?;

    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("failed to create cache dir {}", config.cache_dir.display()))?;

    tracing::info!(
        backend = backend.name(),
        timezone = %config.timezone,
        cache_dir = %config.cache_dir.display(),
        "starting usage-api"
    );

    let state = AppState::new(&config, backend, Clock::System);
    let app = routes::router(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
