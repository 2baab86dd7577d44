//! Server selection.
//!
//! Decides which `--server` arguments a cycle passes to the CLI: none (the
//! provider picks), a single pinned ID, or the candidates left after filtering
//! a fresh `--list` by name and distance.

use crate::config::ServerSelectionConfig;
use crate::core::ServerDescriptor;
use crate::speedtest::SpeedtestError;
use anyhow::{Context, Result};
use regex::Regex;

/// Name and distance predicates applied to a server listing.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub name_pattern: Option<Regex>,
    pub max_distance_km: Option<u64>,
}

impl ServerFilter {
    pub fn is_empty(&self) -> bool {
        self.name_pattern.is_none() && self.max_distance_km.is_none()
    }

    fn name_matches(&self, server: &ServerDescriptor) -> bool {
        self.name_pattern
            .as_ref()
            .map_or(true, |re| re.is_match(&server.name))
    }

    fn distance_matches(&self, server: &ServerDescriptor) -> bool {
        self.max_distance_km
            .map_or(true, |max| server.distance_km <= max)
    }

    /// Returns the IDs of the servers passing both predicates, in input order.
    ///
    /// The name filter runs first, then the distance filter. An empty result
    /// is `NoServerMatch`.
    pub fn select(&self, servers: &[ServerDescriptor]) -> Result<Vec<u32>, SpeedtestError> {
        let candidates: Vec<u32> = servers
            .iter()
            .filter(|s| self.name_matches(s))
            .filter(|s| self.distance_matches(s))
            .map(|s| s.id)
            .collect();

        if candidates.is_empty() {
            return Err(SpeedtestError::NoServerMatch);
        }
        Ok(candidates)
    }
}

/// How a cycle chooses its server arguments.
#[derive(Debug, Clone)]
pub enum ServerPlan {
    /// Let the provider choose.
    ProviderDefault,
    /// Always measure against one server.
    Pinned(u32),
    /// List servers every cycle and keep those passing the filter.
    Discover(ServerFilter),
}

impl ServerPlan {
    /// Builds the plan from configuration. Filters take precedence over a
    /// pinned ID; zero and empty values mean unset.
    pub fn from_config(config: &ServerSelectionConfig) -> Result<Self> {
        let name_pattern = if config.name_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(&config.name_pattern)
                    .with_context(|| format!("invalid server name pattern '{}'", config.name_pattern))?,
            )
        };
        let max_distance_km = (config.max_distance_km > 0).then_some(config.max_distance_km);

        let filter = ServerFilter {
            name_pattern,
            max_distance_km,
        };

        Ok(if !filter.is_empty() {
            ServerPlan::Discover(filter)
        } else if config.server_id != 0 {
            ServerPlan::Pinned(config.server_id)
        } else {
            ServerPlan::ProviderDefault
        })
    }

    pub fn needs_discovery(&self) -> bool {
        matches!(self, ServerPlan::Discover(_))
    }
}

impl std::fmt::Display for ServerPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerPlan::ProviderDefault => write!(f, "provider default"),
            ServerPlan::Pinned(id) => write!(f, "pinned server {}", id),
            ServerPlan::Discover(filter) => {
                write!(f, "discovery")?;
                if let Some(re) = &filter.name_pattern {
                    write!(f, " name=~'{}'", re.as_str())?;
                }
                if let Some(max) = filter.max_distance_km {
                    write!(f, " distance<={}km", max)?;
                }
                Ok(())
            }
        }
    }
}
