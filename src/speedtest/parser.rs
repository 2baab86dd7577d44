//! Parsers for everything the speedtest CLI prints.
//!
//! There are three independent paths: the JSON measurement summary on stdout,
//! the plain-text `--list` output on stdout, and the human-readable error lines
//! on stderr.

use crate::core::{MeasurementResult, ServerDescriptor};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to decode JSON result: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no servers found in server listing")]
    NoServersFound,
}

/// An `ERROR: HTTP Error <code>: <message>` line from stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorLine {
    pub code: u16,
    pub message: String,
}

impl HttpErrorLine {
    /// The provider answers 403 while it is updating its server side.
    pub fn is_throttling(&self) -> bool {
        self.code == 403
    }
}

/// `<id>) <name> [<distance> km]`, IDs possibly right-aligned.
static SERVER_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\)\s+(.+?)\s+\[(\d+(?:\.\d+)?)\s*km\]\s*$")
        .expect("SERVER_LINE_REGEX is a valid regex pattern")
});

/// `Sponsor (City, Country)`
static DISPLAY_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+\((.*),\s*([^,()]+)\)$")
        .expect("DISPLAY_NAME_REGEX is a valid regex pattern")
});

static HTTP_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ERROR: HTTP Error (\d+): (\S.*)$").expect("HTTP_ERROR_REGEX is a valid regex pattern")
});

/// Decodes the JSON summary printed by `speedtest-cli --json`.
///
/// Download, upload, and ping are required. Anything malformed is rejected
/// outright.
pub fn parse_result(payload: &[u8]) -> Result<MeasurementResult, ParseError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Decodes the listing printed by `speedtest-cli --list`.
///
/// Lines that do not look like `<id>) <name> [<distance> km]` are skipped.
pub fn parse_server_list(text: &str) -> Result<Vec<ServerDescriptor>, ParseError> {
    let servers: Vec<ServerDescriptor> = text.lines().filter_map(parse_server_line).collect();
    if servers.is_empty() {
        return Err(ParseError::NoServersFound);
    }
    Ok(servers)
}

fn parse_server_line(line: &str) -> Option<ServerDescriptor> {
    let caps = SERVER_LINE_REGEX.captures(line)?;
    let id = caps[1].parse().ok()?;
    let name = caps[2].to_string();
    let distance: f64 = caps[3].parse().ok()?;

    let (sponsor, country) = match DISPLAY_NAME_REGEX.captures(&name) {
        Some(parts) => (parts[1].to_string(), parts[3].trim().to_string()),
        None => (String::new(), String::new()),
    };

    Some(ServerDescriptor {
        id,
        name,
        sponsor,
        host: String::new(),
        country,
        // Truncated, not rounded: 20.9 km passes a 20 km limit.
        distance_km: distance as u64,
    })
}

/// Returns every `ERROR: HTTP Error` line found in `stderr`, in order.
pub fn http_errors(stderr: &str) -> Vec<HttpErrorLine> {
    stderr
        .lines()
        .filter_map(|line| {
            let caps = HTTP_ERROR_REGEX.captures(line.trim_end())?;
            Some(HttpErrorLine {
                code: caps[1].parse().ok()?,
                message: caps[2].to_string(),
            })
        })
        .collect()
}

/// Returns the first HTTP 403 line in `stderr`, if any.
pub fn find_throttling(stderr: &str) -> Option<HttpErrorLine> {
    http_errors(stderr).into_iter().find(HttpErrorLine::is_throttling)
}
