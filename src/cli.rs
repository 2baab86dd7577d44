//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged over
//! the configuration file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;
use std::time::Duration;

/// Runs speedtest-cli periodically and exposes the results as Prometheus metrics.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP path where to expose metrics.
    #[arg(short = 'p', long = "path", value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Address to listen on, e.g. ":9101" or "127.0.0.1:9101".
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Path to speedtest-cli.
    #[arg(short = 's', long = "speedtest-cli", value_name = "PATH")]
    pub speedtest_cli: Option<PathBuf>,

    /// Interval between speedtest executions, e.g. "30m".
    #[arg(short = 'i', long, value_name = "DURATION", value_parser = parse_whole_seconds)]
    pub interval: Option<Duration>,

    /// Retry interval after server discovery fails, e.g. "60s".
    #[arg(short = 'r', long, value_name = "DURATION", value_parser = parse_whole_seconds)]
    pub retry_interval: Option<Duration>,

    /// Insecure mode: use HTTP instead of HTTPS.
    #[arg(short = 'I', long)]
    pub insecure: bool,

    /// Enable debug logging.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Always measure against this server ID.
    #[arg(long, value_name = "ID")]
    pub server_id: Option<u32>,

    /// Only use servers at most this many kilometers away.
    #[arg(long = "max-distance", value_name = "KM")]
    pub max_distance_km: Option<u64>,

    /// Only use servers whose name matches this regex.
    #[arg(long = "server-name", value_name = "PATTERN")]
    pub server_name: Option<String>,

    /// Kill speedtest-cli if a run takes longer than this, e.g. "5m".
    #[arg(long, value_name = "DURATION", value_parser = parse_whole_seconds)]
    pub timeout: Option<Duration>,
}

/// Parses a humantime duration that must be a whole number of seconds, since
/// the configuration stores durations in seconds.
fn parse_whole_seconds(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value).map_err(|e| e.to_string())?;
    if duration.subsec_nanos() != 0 {
        return Err(format!(
            "'{}' is not a whole number of seconds; use e.g. \"{}s\"",
            value,
            duration.as_secs().max(1)
        ));
    }
    Ok(duration)
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut metrics = Dict::new();
        if let Some(path) = &self.metrics_path {
            metrics.insert("path".into(), Value::from(path.clone()));
        }
        if let Some(address) = &self.listen_address {
            metrics.insert("listen_address".into(), Value::from(address.clone()));
        }

        let mut speedtest = Dict::new();
        if let Some(path) = &self.speedtest_cli {
            speedtest.insert(
                "cli_path".into(),
                Value::from(path.to_string_lossy().into_owned()),
            );
        }
        // Boolean switches only override when present; absence keeps the
        // lower layers' value.
        if self.insecure {
            speedtest.insert("insecure".into(), Value::from(true));
        }
        if let Some(timeout) = self.timeout {
            speedtest.insert("timeout_seconds".into(), Value::from(timeout.as_secs()));
        }

        let mut schedule = Dict::new();
        if let Some(interval) = self.interval {
            schedule.insert("interval_seconds".into(), Value::from(interval.as_secs()));
        }
        if let Some(retry) = self.retry_interval {
            schedule.insert("retry_interval_seconds".into(), Value::from(retry.as_secs()));
        }

        let mut servers = Dict::new();
        if let Some(id) = self.server_id {
            servers.insert("server_id".into(), Value::from(id));
        }
        if let Some(km) = self.max_distance_km {
            servers.insert("max_distance_km".into(), Value::from(km));
        }
        if let Some(pattern) = &self.server_name {
            servers.insert("name_pattern".into(), Value::from(pattern.clone()));
        }

        let mut dict = Dict::new();
        if self.debug {
            dict.insert("debug".into(), Value::from(true));
        }
        for (key, section) in [
            ("metrics", metrics),
            ("speedtest", speedtest),
            ("schedule", schedule),
            ("servers", servers),
        ] {
            if !section.is_empty() {
                dict.insert(key.into(), Value::from(section));
            }
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
