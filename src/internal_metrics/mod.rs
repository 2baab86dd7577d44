//! # Internal Metrics Module
//!
//! The exporter's own health, reported through the `metrics` facade and
//! rendered next to the measurement snapshot on the scrape endpoint.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: Installs the Prometheus recorder, binds the scrape
//!   listener, and constructs the `Metrics` handle and the `MetricsServer`.
//!
//! - **`Metrics`**: A lightweight, cloneable handle with one method per
//!   operational metric the cycle controller updates.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that serves the snapshot and the operational metrics.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use crate::publisher::SnapshotPublisher;
use anyhow::{Context, Result};
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod server;

/// Seconds-scale buckets; a speedtest run takes tens of seconds.
const CYCLE_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 90.0, 120.0, 300.0];

/// The public API for the operational metrics.
#[derive(Clone, Debug, Default)]
pub struct Metrics;

impl Metrics {
    /// Creates a new `Metrics` handle and registers descriptions with the
    /// installed recorder. Without a recorder every call is a no-op.
    pub fn new() -> Self {
        metrics::describe_counter!(
            "speedtest_cycles_total",
            Unit::Count,
            "Total number of measurement cycles, labeled by outcome."
        );
        metrics::describe_histogram!(
            "speedtest_cycle_duration_seconds",
            Unit::Seconds,
            "Wall time of each measurement cycle, including server discovery."
        );
        metrics::describe_gauge!(
            "speedtest_discovered_servers",
            Unit::Count,
            "Candidate servers left after filtering in the last discovery."
        );
        Self
    }

    /// Increments the cycle counter for `outcome`.
    pub fn record_cycle(&self, outcome: &'static str, duration_seconds: f64) {
        metrics::counter!("speedtest_cycles_total", "outcome" => outcome).increment(1);
        metrics::histogram!("speedtest_cycle_duration_seconds").record(duration_seconds);
    }

    pub fn set_discovered_servers(&self, count: usize) {
        metrics::gauge!("speedtest_discovered_servers").set(count as f64);
    }
}

/// Builder for the scrape endpoint.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Binds the listener and prepares the server.
    ///
    /// Binding failure is fatal. Failure to install the global recorder is
    /// not: the endpoint then serves only the measurement snapshot.
    pub async fn build(
        self,
        publisher: Arc<SnapshotPublisher>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Metrics, MetricsServer, SocketAddr)> {
        let listener = bind(&self.config.bind_addresses()).await?;
        let local_addr = listener
            .local_addr()
            .context("failed to get local address for metrics server")?;

        let prom_handle = if self.config.operational_metrics {
            install_recorder()
        } else {
            None
        };

        let metrics = Metrics::new();
        let server = MetricsServer::new(
            listener,
            self.config.path.clone(),
            publisher,
            prom_handle,
            shutdown_rx,
        );
        info!(address = %local_addr, path = %self.config.path, "Metrics server bound");
        Ok((metrics, server, local_addr))
    }
}

/// Binds the first address that works. Every address may be a name, which
/// the resolver expands before binding.
async fn bind(addresses: &[String]) -> Result<TcpListener> {
    let mut last_error = None;
    for address in addresses {
        match TcpListener::bind(address.as_str()).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(address = %address, error = %e, "Bind attempt failed");
                last_error = Some((address, e));
            }
        }
    }
    match last_error {
        Some((address, e)) => {
            Err(e).with_context(|| format!("failed to bind metrics server to {}", address))
        }
        None => anyhow::bail!("failed to bind metrics server: no listen address"),
    }
}

fn install_recorder() -> Option<PrometheusHandle> {
    let builder = match PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("speedtest_cycle_duration_seconds".to_string()),
        CYCLE_DURATION_BUCKETS,
    ) {
        Ok(builder) => builder,
        Err(e) => {
            warn!("Invalid histogram buckets, operational metrics disabled: {}", e);
            return None;
        }
    };
    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    match metrics::set_global_recorder(recorder) {
        Ok(()) => Some(handle),
        Err(e) => {
            warn!("Failed to install Prometheus recorder, operational metrics disabled: {}", e);
            None
        }
    }
}
