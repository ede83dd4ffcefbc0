//! Instance descriptor builder.
//!
//! Maps an [`InstanceSnapshot`] onto the record the registry stores. The
//! mapping is pure: the only inputs are the snapshot, an optional health
//! verdict and the timestamp stamped into `last_ts`.
//!
//! Fields are populated by scanning every container's environment in order.
//! When two containers set the same field the one scanned last wins.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::InstanceSnapshot;

/// Environment variable names read from container specs.
pub mod env_keys {
    pub const CLUSTER_UID: &str = "IDG_CLUSTERUID";
    pub const RUNTIME: &str = "IDG_RUNTIME";
    pub const UNIQUE_ID: &str = "IDG_UNIQUEID";
    pub const SITE_UID: &str = "IDG_SITEUID";
    pub const VERSION: &str = "IDG_VERSION";
    pub const SERVICE_NAME: &str = "IDG_SERVICE_NAME";
    pub const PROTOCOL_MODE: &str = "MSP_PROTOCOL_MODE";
    pub const IMAGE_URL: &str = "IDG_SERVICE_IMAGEURL";
    pub const GATEWAY_ADDR: &str = "IDG_SERVICE_GATEWAY_ADDR";
    pub const WEIGHT: &str = "IDG_WEIGHT";
}

/// Metadata keys emitted on every descriptor.
pub mod meta_keys {
    pub const RUNTIME: &str = "runtime";
    pub const SERVICE_NAME: &str = "service_name";
    pub const MODE: &str = "mode";
    pub const SERVICE_IMAGE: &str = "service_image";
    pub const SERVICE_GATEWAY_ADDR: &str = "service_gateway_addr";
    pub const WEIGHT: &str = "weight";
    pub const CERT_SN: &str = "cert_sn";
}

pub const DEFAULT_WEIGHT: &str = "10";

/// Whether the registry should route traffic to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Receiving,
    NotReceiving,
}

impl InstanceStatus {
    /// Numeric form used on the registry wire.
    pub fn code(self) -> i64 {
        match self {
            InstanceStatus::Receiving => 1,
            InstanceStatus::NotReceiving => 2,
        }
    }

    fn from_health(healthy: bool) -> Self {
        if healthy {
            InstanceStatus::Receiving
        } else {
            InstanceStatus::NotReceiving
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Receiving => write!(f, "receiving"),
            InstanceStatus::NotReceiving => write!(f, "not_receiving"),
        }
    }
}

/// The record sent to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub addrs: Vec<String>,
    pub last_ts: i64,
    pub hostname: String,
    pub status: InstanceStatus,
    pub zone: String,
    pub env: String,
    pub region: String,
    pub version: String,
    pub app_id: String,
    pub metadata: BTreeMap<String, String>,
}

impl InstanceDescriptor {
    pub fn weight(&self) -> &str {
        self.metadata
            .get(meta_keys::WEIGHT)
            .map(String::as_str)
            .unwrap_or(DEFAULT_WEIGHT)
    }
}

/// Build a descriptor stamped with the current time.
///
/// `probe` is `None` when the health probe is disabled; `Some(healthy)`
/// replaces the readiness-derived status.
pub fn build(snapshot: &InstanceSnapshot, probe: Option<bool>) -> InstanceDescriptor {
    build_at(snapshot, probe, Utc::now().timestamp())
}

/// Build a descriptor with an explicit `last_ts`.
pub fn build_at(snapshot: &InstanceSnapshot, probe: Option<bool>, last_ts: i64) -> InstanceDescriptor {
    let readiness = InstanceStatus::from_health(snapshot.is_ready());
    let status = probe.map(InstanceStatus::from_health).unwrap_or(readiness);

    let mut descriptor = InstanceDescriptor {
        addrs: vec![snapshot.address()],
        last_ts,
        hostname: snapshot.name.clone(),
        status,
        zone: String::new(),
        env: String::new(),
        region: String::new(),
        version: String::new(),
        app_id: String::new(),
        metadata: BTreeMap::new(),
    };

    for var in snapshot.env_vars() {
        let value = var.value.clone();
        match var.name.as_str() {
            env_keys::CLUSTER_UID => descriptor.zone = value,
            env_keys::RUNTIME => {
                descriptor.metadata.insert(meta_keys::RUNTIME.into(), value.clone());
                descriptor.env = value;
            }
            env_keys::UNIQUE_ID => descriptor.app_id = value,
            env_keys::SITE_UID => descriptor.region = value,
            env_keys::VERSION => descriptor.version = value,
            other => {
                if let Some(key) = metadata_key(other) {
                    descriptor.metadata.insert(key.into(), value);
                }
            }
        }
    }

    // TODO: populate cert_sn once certificate serials are exposed on the pod.
    descriptor.metadata.insert(meta_keys::CERT_SN.into(), String::new());
    let weight = descriptor.metadata.entry(meta_keys::WEIGHT.into()).or_default();
    if weight.is_empty() {
        *weight = DEFAULT_WEIGHT.to_owned();
    }

    descriptor
}

fn metadata_key(env_name: &str) -> Option<&'static str> {
    match env_name {
        env_keys::SERVICE_NAME => Some(meta_keys::SERVICE_NAME),
        env_keys::PROTOCOL_MODE => Some(meta_keys::MODE),
        env_keys::IMAGE_URL => Some(meta_keys::SERVICE_IMAGE),
        env_keys::GATEWAY_ADDR => Some(meta_keys::SERVICE_GATEWAY_ADDR),
        env_keys::WEIGHT => Some(meta_keys::WEIGHT),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Container, ContainerStatus, EnvVar, Phase};

    fn snapshot(env: Vec<EnvVar>) -> InstanceSnapshot {
        InstanceSnapshot {
            name: "web-0".into(),
            namespace: "shop".into(),
            resource_version: "1".into(),
            phase: Phase::Running,
            pod_ip: "10.0.0.7".into(),
            containers: vec![Container { name: "app".into(), env }],
            container_statuses: vec![ContainerStatus { name: "app".into(), ready: true }],
        }
    }

    #[test]
    fn status_code_matches_wire_values() {
        assert_eq!(InstanceStatus::Receiving.code(), 1);
        assert_eq!(InstanceStatus::NotReceiving.code(), 2);
    }

    #[test]
    fn runtime_fills_env_and_metadata() {
        let d = build_at(&snapshot(vec![EnvVar::new(env_keys::RUNTIME, "jvm")]), None, 0);
        assert_eq!(d.env, "jvm");
        assert_eq!(d.metadata[meta_keys::RUNTIME], "jvm");
    }

    #[test]
    fn cert_sn_and_weight_emitted_without_env() {
        let mut snap = snapshot(vec![]);
        snap.containers.clear();
        let d = build_at(&snap, None, 0);
        assert_eq!(d.metadata[meta_keys::CERT_SN], "");
        assert_eq!(d.weight(), "10");
        assert_eq!(d.metadata.len(), 2);
    }

    #[test]
    fn unrelated_env_is_ignored() {
        let d = build_at(&snapshot(vec![EnvVar::new("PATH", "/usr/bin")]), None, 0);
        assert!(!d.metadata.contains_key("PATH"));
    }

    #[test]
    fn last_ts_is_taken_verbatim() {
        let d = build_at(&snapshot(vec![]), None, 1_700_000_000);
        assert_eq!(d.last_ts, 1_700_000_000);
    }
}
