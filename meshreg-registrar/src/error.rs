//! Error types for meshreg-registrar.

use thiserror::Error;

use meshreg_core::InstanceKey;

/// Failures reported by a discovery client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got an HTTP answer (DNS, connect, timeout, ...).
    #[error("transport error talking to {node}: {message}")]
    Transport { node: String, message: String },

    /// The node answered but refused the request.
    #[error("registry node {node} rejected {op} with code {code}: {message}")]
    Rejected {
        node: String,
        op: &'static str,
        code: i64,
        message: String,
    },

    /// The client could not be configured (bad node list, bad identity, ...).
    #[error("invalid discovery client configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures surfaced by [`crate::Registrar`] operations.
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// Creating the per-instance handle failed; nothing was cached.
    #[error("failed to create discovery client for {key}: {source}")]
    Connect {
        key: InstanceKey,
        #[source]
        source: ClientError,
    },

    #[error("register of {key} (app {app_id}) failed: {source}")]
    Register {
        key: InstanceKey,
        app_id: String,
        #[source]
        source: ClientError,
    },
}

impl RegistrarError {
    pub fn key(&self) -> &InstanceKey {
        match self {
            RegistrarError::Connect { key, .. } | RegistrarError::Register { key, .. } => key,
        }
    }
}

/// Why a health probe could not produce a verdict.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("health probe of {url} failed: {message}")]
    Transport { url: String, message: String },
}
