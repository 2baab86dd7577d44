//! Test helpers for running the full application instance.

use anyhow::Result;
use speedtest_exporter::{
    app::AppBuilder, config::Config, publisher::SnapshotPublisher,
    speedtest::test_utils::FakeSpeedtestRunner,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::timeout};

/// A running instance of the application.
#[derive(Debug)]
pub struct TestApp {
    pub shutdown_tx: watch::Sender<bool>,
    pub app_handle: Option<JoinHandle<Result<()>>>,
    pub publisher: Arc<SnapshotPublisher>,
    metrics_addr: SocketAddr,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.metrics_addr, path)
    }

    /// GETs `path` and returns the status code and body.
    pub async fn get(&self, path: &str) -> (u16, String) {
        let response = reqwest::get(self.url(path)).await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    /// Waits until the first measurement has been published.
    pub async fn wait_for_publish(&self, timeout_duration: Duration) {
        timeout(timeout_duration, async {
            while self.publisher.latest().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no measurement published in time");
    }

    /// Shuts down the application and waits for it to terminate.
    /// Fails if the application does not shut down within the specified timeout.
    pub async fn shutdown(self, timeout_duration: Duration) -> Result<()> {
        self.shutdown_tx
            .send(true)
            .expect("Failed to send shutdown signal");

        if let Some(handle) = self.app_handle {
            match timeout(timeout_duration, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!("App failed to shut down within the timeout")),
            }
        } else {
            Ok(())
        }
    }
}

/// A builder for creating `TestApp` instances with specific configurations.
pub struct TestAppBuilder {
    pub config: Config,
    pub runner: FakeSpeedtestRunner,
}

impl TestAppBuilder {
    /// Binds an ephemeral loopback port and leaves operational metrics off, so
    /// tests in one binary do not race for the global recorder.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.metrics.listen_address = "127.0.0.1:0".to_string();
        config.metrics.operational_metrics = false;
        Self {
            config,
            runner: FakeSpeedtestRunner::new(),
        }
    }

    pub fn with_config_modifier(mut self, modifier: impl FnOnce(&mut Config)) -> Self {
        modifier(&mut self.config);
        self
    }

    pub fn with_runner(mut self, runner: FakeSpeedtestRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Builds the application and spawns its run loop. The real sleeper is
    /// kept, so after the first cycle the controller waits a full interval.
    pub async fn build(self) -> Result<TestApp> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = AppBuilder::new(self.config)
            .runner_override(Arc::new(self.runner))
            .build(shutdown_rx)
            .await?;
        let metrics_addr = app.metrics_addr();
        let publisher = app.publisher();
        let app_handle = tokio::spawn(app.run());
        Ok(TestApp {
            shutdown_tx,
            app_handle: Some(app_handle),
            publisher,
            metrics_addr,
        })
    }
}
