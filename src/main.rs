//! Speedtest Exporter - periodic speedtest-cli runs as Prometheus metrics.

use anyhow::Result;
use clap::Parser;
use speedtest_exporter::{
    app::App, cli::Cli, config::Config, controller::THROTTLE_BACKOFF, selection::ServerPlan,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        tracing_subscriber::fmt().init();
        error!("Failed to load configuration: {:#}", err);
        std::process::exit(1);
    });

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Speedtest exporter starting up...");

    info!("-------------------- Configuration --------------------");
    info!("Log Level: {}", config.log_filter());
    info!(
        "Listen Address: {}{}",
        config.metrics.listen_address, config.metrics.path
    );
    info!("Operational Metrics: {}", config.metrics.operational_metrics);
    info!("Speedtest CLI: {}", config.speedtest.cli_path.display());
    info!("Insecure: {}", config.speedtest.insecure);
    match config.speedtest.timeout() {
        Some(timeout) => info!("Run Timeout: {}", humantime::format_duration(timeout)),
        None => info!("Run Timeout: none"),
    }
    info!(
        "Interval: {}",
        humantime::format_duration(config.schedule.interval())
    );
    info!(
        "Retry Interval: {}",
        humantime::format_duration(config.schedule.retry_interval())
    );
    info!("Server Selection: {}", ServerPlan::from_config(&config.servers)?);
    info!("-------------------------------------------------------");
    for warning in config.schedule.warnings(THROTTLE_BACKOFF) {
        warn!("{}", warning);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = App::builder(config).build(shutdown_rx).await?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received. Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    app.run().await?;
    info!("Exiting.");
    Ok(())
}
