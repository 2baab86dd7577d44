//! Configuration management for the speedtest exporter
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! `figment` to layer built-in defaults, an optional TOML file, environment
//! variables, and command-line flags, in that order of precedence.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SPEEDTEST_EXPORTER_SCHEDULE__INTERVAL_SECONDS`.
pub const ENV_PREFIX: &str = "SPEEDTEST_EXPORTER_";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Forces debug logging regardless of `log_level`.
    pub debug: bool,
    /// Configuration for the scrape endpoint.
    pub metrics: MetricsConfig,
    /// Configuration for the external speedtest CLI.
    pub speedtest: SpeedtestConfig,
    /// Cycle timing.
    pub schedule: ScheduleConfig,
    /// Server selection.
    pub servers: ServerSelectionConfig,
}

/// Configuration for the scrape endpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// `host:port` to listen on. A bare `:port` listens on all interfaces.
    pub listen_address: String,
    /// The HTTP path serving the metrics.
    pub path: String,
    /// Also expose the exporter's own cycle counters.
    pub operational_metrics: bool,
}

impl MetricsConfig {
    /// The addresses to try binding, in order.
    ///
    /// A bare `:port` tries the IPv6 wildcard first, which also accepts IPv4 on
    /// dual-stack hosts, then falls back to `0.0.0.0:port`. Anything else is
    /// passed through and may name a host to resolve.
    pub fn bind_addresses(&self) -> Vec<String> {
        if self.listen_address.starts_with(':') {
            vec![
                format!("[::]{}", self.listen_address),
                format!("0.0.0.0{}", self.listen_address),
            ]
        } else {
            vec![self.listen_address.clone()]
        }
    }

    /// Checks that `listen_address` looks like `host:port` with a numeric
    /// port. The host may be empty, a name, an IPv4 address or a bracketed
    /// IPv6 address. Names are only resolved at bind time.
    pub fn validate_listen_address(&self) -> Result<()> {
        let address = &self.listen_address;
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("invalid listen address '{}': expected host:port", address))?;
        port.parse::<u16>()
            .with_context(|| format!("invalid listen address '{}': bad port '{}'", address, port))?;
        let bracketed = host.starts_with('[') && host.ends_with(']');
        if bracketed {
            host[1..host.len() - 1]
                .parse::<std::net::Ipv6Addr>()
                .with_context(|| format!("invalid listen address '{}': bad IPv6 host", address))?;
        } else if host.contains(':') || host.contains(char::is_whitespace) {
            bail!("invalid listen address '{}': bad host '{}'", address, host);
        }
        Ok(())
    }
}

/// Configuration for the external speedtest CLI.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SpeedtestConfig {
    /// Path to `speedtest-cli`, resolved through `PATH` if not absolute.
    pub cli_path: PathBuf,
    /// Use HTTP instead of HTTPS.
    pub insecure: bool,
    /// Hard deadline for one CLI run in seconds. `0` disables it.
    pub timeout_seconds: u64,
}

impl SpeedtestConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

/// Cycle timing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay between measurements in seconds.
    pub interval_seconds: u64,
    /// Delay before retrying after server discovery failed, in seconds.
    pub retry_interval_seconds: u64,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    /// Timings that are accepted but make the backoffs pointless: a retry
    /// interval not shorter than the normal interval, or a throttling backoff
    /// longer than the normal interval.
    pub fn warnings(&self, throttle_backoff: Duration) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.retry_interval() >= self.interval() {
            warnings.push(format!(
                "retry interval {}s is not shorter than the interval {}s",
                self.retry_interval_seconds, self.interval_seconds
            ));
        }
        if throttle_backoff > self.interval() {
            warnings.push(format!(
                "throttling backoff {}s is longer than the interval {}s",
                throttle_backoff.as_secs(),
                self.interval_seconds
            ));
        }
        warnings
    }
}

/// Server selection. Zero and empty values mean unset.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ServerSelectionConfig {
    /// Always measure against this server ID.
    pub server_id: u32,
    /// Only consider servers at most this far away.
    pub max_distance_km: u64,
    /// Only consider servers whose display name matches this regex.
    pub name_pattern: String,
}

impl Config {
    /// Loads the application configuration by layering defaults, the file
    /// named by `--config`, environment variables, and CLI flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = &cli.config {
            if !path.exists() {
                bail!("configuration file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            // e.g. SPEEDTEST_EXPORTER_SPEEDTEST__INSECURE=true
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the daemon cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_seconds == 0 {
            bail!("schedule.interval_seconds must be greater than zero");
        }
        if self.schedule.retry_interval_seconds == 0 {
            bail!("schedule.retry_interval_seconds must be greater than zero");
        }
        if !self.metrics.path.starts_with('/') {
            bail!("metrics.path must start with '/', got '{}'", self.metrics.path);
        }
        self.metrics.validate_listen_address()?;
        if !self.servers.name_pattern.is_empty() {
            regex::Regex::new(&self.servers.name_pattern).with_context(|| {
                format!("invalid servers.name_pattern '{}'", self.servers.name_pattern)
            })?;
        }
        Ok(())
    }

    /// The filter directive for the tracing subscriber.
    pub fn log_filter(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            metrics: MetricsConfig::default(),
            speedtest: SpeedtestConfig::default(),
            schedule: ScheduleConfig::default(),
            servers: ServerSelectionConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_address: ":9101".to_string(),
            path: "/metrics".to_string(),
            operational_metrics: true,
        }
    }
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            cli_path: PathBuf::from("speedtest-cli"),
            insecure: false,
            timeout_seconds: 0,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30 * 60,
            retry_interval_seconds: 60,
        }
    }
}
