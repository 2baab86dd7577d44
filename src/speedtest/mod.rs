//! The speedtest CLI wrapper.
//!
//! `SpeedtestCli` builds argument lists for the external tool, runs it through
//! the invoker, and turns raw output into typed results or classified errors.

pub mod invoker;
pub mod parser;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::config::SpeedtestConfig;
use crate::core::{MeasurementResult, ServerDescriptor, SpeedtestRunner};
use async_trait::async_trait;
use invoker::{invoke, InvokeError};
use parser::ParseError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum SpeedtestError {
    #[error("failed to execute speedtest CLI: {0}")]
    Execution(#[from] InvokeError),

    #[error("speedtest temporarily failed with HTTP {code}: {message}")]
    ProviderThrottling { code: u16, message: String },

    #[error("failed to decode speedtest result: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("speedtest CLI listed no servers")]
    NoServersFound,

    #[error("no server matched the configured filters")]
    NoServerMatch,
}

impl From<ParseError> for SpeedtestError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Decode(e) => SpeedtestError::Decode(e),
            ParseError::NoServersFound => SpeedtestError::NoServersFound,
        }
    }
}

/// Runs the real `speedtest-cli` executable.
#[derive(Debug, Clone)]
pub struct SpeedtestCli {
    path: PathBuf,
    insecure: bool,
    timeout: Option<Duration>,
}

impl SpeedtestCli {
    pub fn new(path: PathBuf, insecure: bool, timeout: Option<Duration>) -> Self {
        Self {
            path,
            insecure,
            timeout,
        }
    }

    pub fn from_config(config: &SpeedtestConfig) -> Self {
        Self::new(config.cli_path.clone(), config.insecure, config.timeout())
    }

    /// Arguments for a measurement against `servers`, or the provider default
    /// when `servers` is empty.
    pub fn measure_args(&self, servers: &[u32]) -> Vec<String> {
        let mut args = vec!["--json".to_string()];
        if !self.insecure {
            args.push("--secure".to_string());
        }
        for id in servers {
            args.push("--server".to_string());
            args.push(id.to_string());
        }
        args
    }

    pub fn list_args(&self) -> Vec<String> {
        let mut args = vec!["--list".to_string()];
        if !self.insecure {
            args.push("--secure".to_string());
        }
        args
    }

    /// Runs the CLI and checks stderr for provider throttling before anything
    /// else is interpreted.
    async fn run(&self, args: &[String]) -> Result<Vec<u8>, SpeedtestError> {
        match invoke(&self.path, args, self.timeout).await {
            Ok(output) => {
                classify_stderr(&output.stderr_lossy())?;
                Ok(output.stdout)
            }
            Err(InvokeError::Exit {
                path,
                status,
                output,
            }) => {
                classify_stderr(&output.stderr_lossy())?;
                Err(InvokeError::Exit {
                    path,
                    status,
                    output,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn classify_stderr(stderr: &str) -> Result<(), SpeedtestError> {
    match parser::find_throttling(stderr) {
        Some(line) => Err(SpeedtestError::ProviderThrottling {
            code: line.code,
            message: line.message,
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl SpeedtestRunner for SpeedtestCli {
    #[instrument(skip(self))]
    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, SpeedtestError> {
        let stdout = self.run(&self.list_args()).await?;
        let servers = parser::parse_server_list(&String::from_utf8_lossy(&stdout))?;
        debug!(count = servers.len(), "Parsed server listing");
        Ok(servers)
    }

    #[instrument(skip(self))]
    async fn measure(&self, servers: &[u32]) -> Result<MeasurementResult, SpeedtestError> {
        let stdout = self.run(&self.measure_args(servers)).await?;
        Ok(parser::parse_result(&stdout)?)
    }
}
