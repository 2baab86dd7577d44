//! The measurement cycle controller.
//!
//! One long-lived task loops forever: pick server arguments, run the CLI,
//! publish or keep the snapshot, then sleep. The sleep length depends on how
//! the cycle ended:
//!
//! | outcome              | snapshot          | next cycle after      |
//! |----------------------|-------------------|-----------------------|
//! | published            | replaced          | normal interval       |
//! | measurement failed   | left as it was    | normal interval       |
//! | throttled (HTTP 403) | left as it was    | [`THROTTLE_BACKOFF`]  |
//! | discovery failed     | zeroed            | retry interval        |

use crate::config::ScheduleConfig;
use crate::core::{Sleeper, SpeedtestRunner};
use crate::internal_metrics::Metrics;
use crate::publisher::SnapshotPublisher;
use crate::selection::ServerPlan;
use crate::speedtest::SpeedtestError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Fixed wait after the provider answered HTTP 403.
pub const THROTTLE_BACKOFF: Duration = Duration::from_secs(60);

/// How a single cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    MeasurementFailed,
    Throttled,
    DiscoveryFailed,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Published => "published",
            CycleOutcome::MeasurementFailed => "measurement_failed",
            CycleOutcome::Throttled => "throttled",
            CycleOutcome::DiscoveryFailed => "discovery_failed",
        }
    }
}

/// Drives measurement cycles and owns the write side of the snapshot.
pub struct MeasurementController {
    runner: Arc<dyn SpeedtestRunner>,
    publisher: Arc<SnapshotPublisher>,
    sleeper: Arc<dyn Sleeper>,
    plan: ServerPlan,
    interval: Duration,
    retry_interval: Duration,
    metrics: Metrics,
}

impl MeasurementController {
    pub fn new(
        runner: Arc<dyn SpeedtestRunner>,
        publisher: Arc<SnapshotPublisher>,
        sleeper: Arc<dyn Sleeper>,
        plan: ServerPlan,
        schedule: &ScheduleConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            runner,
            publisher,
            sleeper,
            plan,
            interval: schedule.interval(),
            retry_interval: schedule.retry_interval(),
            metrics,
        }
    }

    /// The wait before the cycle following `outcome`.
    pub fn delay_after(&self, outcome: CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::Published | CycleOutcome::MeasurementFailed => self.interval,
            CycleOutcome::Throttled => THROTTLE_BACKOFF,
            CycleOutcome::DiscoveryFailed => self.retry_interval,
        }
    }

    /// Resolves this cycle's `--server` arguments. An empty list means the
    /// provider picks.
    async fn select_servers(&self) -> Result<Vec<u32>, SpeedtestError> {
        match &self.plan {
            ServerPlan::ProviderDefault => Ok(Vec::new()),
            ServerPlan::Pinned(id) => Ok(vec![*id]),
            ServerPlan::Discover(filter) => {
                let servers = self.runner.list_servers().await?;
                debug!(listed = servers.len(), "Discovered servers");
                let candidates = filter.select(&servers);
                self.metrics
                    .set_discovered_servers(candidates.as_ref().map_or(0, Vec::len));
                candidates
            }
        }
    }

    /// Runs one full cycle without sleeping.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let servers = match self.select_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Server discovery failed, zeroing snapshot: {}", e);
                self.publisher.publish_zero();
                return CycleOutcome::DiscoveryFailed;
            }
        };

        info!(?servers, "Running speed test...");
        match self.runner.measure(&servers).await {
            Ok(result) => {
                info!(
                    download = result.download,
                    upload = result.upload,
                    ping = result.ping,
                    server = %result.server.host,
                    "Speed test finished"
                );
                self.publisher.publish(&result);
                CycleOutcome::Published
            }
            Err(e @ SpeedtestError::ProviderThrottling { .. }) => {
                warn!("Retryable error: {}", e);
                CycleOutcome::Throttled
            }
            Err(e) => {
                error!("Failed to run speed test: {}", e);
                CycleOutcome::MeasurementFailed
            }
        }
    }

    /// Loops until `shutdown_rx` fires. Both the in-flight cycle and the sleep
    /// are abandoned on shutdown; dropping the cycle kills the subprocess.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(plan = %self.plan, interval = ?self.interval, "Measurement controller started.");
        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                outcome = self.run_cycle() => outcome,
            };
            self.metrics
                .record_cycle(outcome.as_str(), started.elapsed().as_secs_f64());

            let delay = self.delay_after(outcome);
            info!(outcome = outcome.as_str(), "Sleeping {:?}...", delay);
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = self.sleeper.sleep(delay) => {}
            }
        }
        info!("Measurement controller received shutdown signal.");
    }
}
