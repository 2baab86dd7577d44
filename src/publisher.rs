//! The exported measurement snapshot.
//!
//! The snapshot lives in its own `prometheus::Registry` instead of the global
//! `metrics` recorder because every publish has to drop all label sets from
//! the previous cycle, which only a `GaugeVec` reset gives us. A single mutex
//! covers both the replace and the gather, so a scrape sees either the old
//! label set or the new one, never a mix.

use crate::core::MeasurementResult;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub const SPEED_METRIC: &str = "speedtest_speed_bits_per_second";
pub const PING_METRIC: &str = "speedtest_ping_msec";

const SPEED_LABELS: [&str; 7] = [
    "direction",
    "client_ip",
    "client_isp",
    "client_country",
    "server_sponsor",
    "server_host",
    "server_country",
];

/// Holds the latest measurement as gauges. The cycle controller is the only
/// writer; scrapes read through [`SnapshotPublisher::render`].
pub struct SnapshotPublisher {
    registry: Registry,
    speed: GaugeVec,
    ping: Gauge,
    latest: Mutex<Option<MeasurementResult>>,
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher").finish_non_exhaustive()
    }
}

impl SnapshotPublisher {
    /// Creates the gauges and registers them. Failure here is a setup error.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let speed = GaugeVec::new(
            Opts::new(SPEED_METRIC, "SpeedTest.net upload and download speed"),
            &SPEED_LABELS,
        )?;
        let ping = Gauge::with_opts(Opts::new(
            PING_METRIC,
            "SpeedTest.net ping latency in milliseconds",
        ))?;
        registry.register(Box::new(speed.clone()))?;
        registry.register(Box::new(ping.clone()))?;

        Ok(Self {
            registry,
            speed,
            ping,
            latest: Mutex::new(None),
        })
    }

    /// Replaces the snapshot with `result`: exactly one upload and one
    /// download sample carrying the result's labels, plus its ping.
    pub fn publish(&self, result: &MeasurementResult) {
        let labels = result.label_values();
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        self.replace(&labels, result.upload, result.download, result.ping);
        *latest = Some(result.clone());
        debug!(
            upload = result.upload,
            download = result.download,
            ping = result.ping,
            "Published measurement snapshot"
        );
    }

    /// Replaces the snapshot with empty labels and zero values.
    pub fn publish_zero(&self) {
        let labels: [String; 6] = Default::default();
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        self.replace(&labels, 0.0, 0.0, 0.0);
        *latest = None;
        debug!("Published zeroed snapshot");
    }

    /// Must be called with `latest` held.
    fn replace(&self, labels: &[String; 6], upload: f64, download: f64, ping: f64) {
        self.speed.reset();
        for (direction, value) in [("upload", upload), ("download", download)] {
            let mut values: Vec<&str> = Vec::with_capacity(SPEED_LABELS.len());
            values.push(direction);
            values.extend(labels.iter().map(String::as_str));
            self.speed.with_label_values(&values).set(value);
        }
        self.ping.set(ping);
    }

    /// The measurement currently exported, if the last publish was not a zero.
    pub fn latest(&self) -> Option<MeasurementResult> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Renders the snapshot in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let families = {
            let _guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
