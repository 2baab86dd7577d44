//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    controller::MeasurementController,
    core::{Sleeper, SpeedtestRunner, TokioSleeper},
    internal_metrics::MetricsBuilder,
    publisher::SnapshotPublisher,
    selection::ServerPlan,
    speedtest::SpeedtestCli,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// A handle to the running application, containing all its task handles.
pub struct App {
    task_manager: TaskManager,
    metrics_addr: SocketAddr,
    publisher: Arc<SnapshotPublisher>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the scrape endpoint is actually bound to.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        self.publisher.clone()
    }

    /// Waits for the shutdown signal and then gracefully shuts down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        if !*shutdown_rx.borrow() {
            shutdown_rx.changed().await.ok();
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        let panicked = self.task_manager.shutdown().await;
        if !panicked.is_empty() {
            warn!(tasks = ?panicked, "Some tasks panicked before shutdown.");
        }
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the components from running them, and lets tests
/// swap the speedtest runner and the sleeper.
pub struct AppBuilder {
    config: Config,
    runner_override: Option<Arc<dyn SpeedtestRunner>>,
    sleeper_override: Option<Arc<dyn Sleeper>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runner_override: None,
            sleeper_override: None,
        }
    }

    /// Overrides the speedtest runner for testing.
    pub fn runner_override(mut self, runner: Arc<dyn SpeedtestRunner>) -> Self {
        self.runner_override = Some(runner);
        self
    }

    /// Overrides the sleeper for testing.
    pub fn sleeper_override(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper_override = Some(sleeper);
        self
    }

    /// Builds and starts every component, returning a runnable `App`.
    ///
    /// Fails if the snapshot metrics cannot be registered, the server
    /// selection is invalid, or the listen address cannot be bound.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        let publisher = Arc::new(
            SnapshotPublisher::new().context("failed to register measurement metrics")?,
        );
        let plan = ServerPlan::from_config(&config.servers)?;

        // =========================================================================
        // 1. Scrape endpoint
        // =========================================================================
        let (metrics, server, metrics_addr) = MetricsBuilder::new(config.metrics.clone())
            .build(publisher.clone(), task_manager.get_shutdown_rx())
            .await?;
        task_manager.spawn("MetricsServer", server.run());

        // =========================================================================
        // 2. Measurement loop
        // =========================================================================
        let runner: Arc<dyn SpeedtestRunner> = match self.runner_override {
            Some(runner) => runner,
            None => Arc::new(SpeedtestCli::from_config(&config.speedtest)),
        };
        let sleeper: Arc<dyn Sleeper> = match self.sleeper_override {
            Some(sleeper) => sleeper,
            None => Arc::new(TokioSleeper),
        };
        let controller = MeasurementController::new(
            runner,
            publisher.clone(),
            sleeper,
            plan,
            &config.schedule,
            metrics,
        );
        task_manager.spawn("MeasurementController", controller.run(task_manager.get_shutdown_rx()));

        info!(address = %metrics_addr, "Speedtest exporter initialized.");
        Ok(App {
            task_manager,
            metrics_addr,
            publisher,
        })
    }
}
