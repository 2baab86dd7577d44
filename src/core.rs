//! Core domain types and service traits for the speedtest exporter
//!
//! This module defines the measurement records produced by the speedtest CLI
//! and the trait contracts that let the cycle controller run against either
//! the real subprocess or a fake.

use crate::speedtest::SpeedtestError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// A single completed speed measurement, decoded from `speedtest-cli --json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementResult {
    /// Download throughput in bits per second
    pub download: f64,
    /// Upload throughput in bits per second
    pub upload: f64,
    /// Ping latency in milliseconds
    pub ping: f64,
    /// When the CLI finished the measurement
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub client: ClientDescriptor,
    #[serde(default)]
    pub server: ServerInfo,
}

impl MeasurementResult {
    /// Returns the label values shared by the upload and download samples, in
    /// the order `client_ip, client_isp, client_country, server_sponsor,
    /// server_host, server_country`.
    pub fn label_values(&self) -> [String; 6] {
        [
            self.client.ip_label(),
            self.client.isp.clone(),
            self.client.country.clone(),
            self.server.sponsor.clone(),
            self.server.host.clone(),
            self.server.country.clone(),
        ]
    }
}

/// The client block of a measurement. Everything is passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientDescriptor {
    /// Public IP as seen by the provider. Left empty when absent or unparseable.
    #[serde(default, deserialize_with = "lenient_ip")]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub isprating: String,
}

impl ClientDescriptor {
    pub fn ip_label(&self) -> String {
        self.ip.map(|ip| ip.to_string()).unwrap_or_default()
    }
}

/// The server block of a measurement, in the shape the CLI emits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sponsor: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub cc: String,
    /// Distance to the client in kilometers
    #[serde(default)]
    pub d: f64,
    #[serde(default)]
    pub latency: f64,
}

/// One entry from `speedtest-cli --list`.
///
/// IDs are only unique within a single listing. `host` is never part of the
/// listing and is always empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerDescriptor {
    pub id: u32,
    /// The full display name, e.g. `Example ISP (Berlin, Germany)`
    pub name: String,
    pub sponsor: String,
    pub host: String,
    pub country: String,
    /// Distance to the client, truncated toward zero
    pub distance_km: u64,
}

fn lenient_ip<'de, D>(deserializer: D) -> Result<Option<IpAddr>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

// =============================================================================
// Service Traits
// =============================================================================

/// Runs the external measurement tool.
#[async_trait]
pub trait SpeedtestRunner: Send + Sync {
    /// Lists the servers the provider offers near the client.
    ///
    /// # Returns
    /// * `Ok(servers)` with at least one entry
    /// * `Err(SpeedtestError::NoServersFound)` if the listing had no server lines
    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, SpeedtestError>;

    /// Runs one measurement. An empty `servers` slice lets the provider pick.
    async fn measure(&self, servers: &[u32]) -> Result<MeasurementResult, SpeedtestError>;
}

/// Waits between cycles. Abstracted so tests can run cycles without real time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The production sleeper, backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
