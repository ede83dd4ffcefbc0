//! Domain types for instance snapshots.
//!
//! A snapshot is the orchestrator's view of one pod at one point in time.
//! Snapshots are immutable once built; every change arrives as a new snapshot
//! with a new resource version.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier of an orchestrated unit: `namespace/name`.
///
/// When the namespace is empty the key is just the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey(pub String);

impl InstanceKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        if namespace.is_empty() {
            Self(name.to_owned())
        } else {
            Self(format!("{namespace}/{name}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Orchestrator-reported lifecycle phase.
///
/// Only `Running` matters to the dispatcher; every other value is treated as
/// "not running".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl Phase {
    pub fn is_running(self) -> bool {
        matches!(self, Phase::Running)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Running => write!(f, "Running"),
            Phase::Succeeded => write!(f, "Succeeded"),
            Phase::Failed => write!(f, "Failed"),
            Phase::Unknown => write!(f, "Unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One `name=value` entry from a container's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Container spec, reduced to what the descriptor builder reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// Per-container readiness as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub ready: bool,
}

/// Immutable view of one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceSnapshot {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Opaque change token; equal versions mean "nothing changed".
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub pod_ip: String,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl InstanceSnapshot {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.namespace, &self.name)
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    /// `false` as soon as one container reports not-ready.
    pub fn is_ready(&self) -> bool {
        self.container_statuses.iter().all(|status| status.ready)
    }

    /// `http://<pod-ip>:80`, the single address published for the instance.
    pub fn address(&self) -> String {
        format!("http://{}:80", self.pod_ip)
    }

    /// Iterates every container's environment in spec order.
    pub fn env_vars(&self) -> impl Iterator<Item = &EnvVar> {
        self.containers.iter().flat_map(|c| c.env.iter())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
