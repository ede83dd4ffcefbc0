//! Process-wide discovery configuration.
//!
//! Built once at startup from parsed CLI/environment values and shared by
//! reference afterwards. Nothing in the workspace reads the environment again.

use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;

pub const DEFAULT_DISCOVERY_ADDRESS: &str = "service-eye.msp:9443";

/// Interval at which the registry expects a live instance to renew.
pub const RENEW_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryConfig {
    pub nodes: Vec<String>,
    pub zone: String,
    pub env: String,
    pub region: String,
    pub renew_interval: Duration,
}

impl DiscoveryConfig {
    /// `nodes` is the raw comma-separated list; blank entries are dropped.
    pub fn new(
        nodes: &str,
        zone: impl Into<String>,
        env: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let nodes = parse_nodes(nodes);
        if nodes.is_empty() {
            return Err(CoreError::NoDiscoveryNodes);
        }
        Ok(Self {
            nodes,
            zone: zone.into(),
            env: env.into(),
            region: region.into(),
            renew_interval: RENEW_INTERVAL,
        })
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            nodes: vec![DEFAULT_DISCOVERY_ADDRESS.to_owned()],
            zone: String::new(),
            env: String::new(),
            region: String::new(),
            renew_interval: RENEW_INTERVAL,
        }
    }
}

pub fn parse_nodes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(str::to_owned)
        .collect()
}
