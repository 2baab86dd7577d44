//! Runs the speedtest CLI as a subprocess and captures both output streams.
//!
//! The invoker does not interpret exit codes. A non-zero exit is returned
//! together with everything the process wrote so the caller can classify it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Everything the subprocess wrote, untruncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stdout: {}\nStderr: {}",
            self.stdout_lossy().trim_end(),
            self.stderr_lossy().trim_end()
        )
    }
}

#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("failed to spawn {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exited with {status}\n{output}", path.display())]
    Exit {
        path: PathBuf,
        status: ExitStatus,
        output: CapturedOutput,
    },

    #[error("{} did not finish within {after:?}", path.display())]
    Timeout { path: PathBuf, after: Duration },
}

/// Runs `path` with `args` to completion.
///
/// When `deadline` is set the process is killed once it elapses. The child is
/// also killed if the returned future is dropped, which is how shutdown
/// interrupts a running measurement.
pub async fn invoke(
    path: &Path,
    args: &[String],
    deadline: Option<Duration>,
) -> Result<CapturedOutput, InvokeError> {
    debug!(cli = %path.display(), ?args, "Invoking speedtest CLI");

    let mut command = Command::new(path);
    command
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let run = command.output();
    let result = match deadline {
        Some(after) => match tokio::time::timeout(after, run).await {
            Ok(result) => result,
            Err(_) => {
                return Err(InvokeError::Timeout {
                    path: path.to_path_buf(),
                    after,
                })
            }
        },
        None => run.await,
    };

    let output = result.map_err(|source| InvokeError::Spawn {
        path: path.to_path_buf(),
        source,
    })?;

    let captured = CapturedOutput {
        stdout: output.stdout,
        stderr: output.stderr,
    };

    if output.status.success() {
        Ok(captured)
    } else {
        Err(InvokeError::Exit {
            path: path.to_path_buf(),
            status: output.status,
            output: captured,
        })
    }
}
