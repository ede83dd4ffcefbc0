//! Error types for meshreg-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from manifest loading and configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with the path that was being read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A snapshot parsed but is missing its name.
    #[error("snapshot at {path} has no name")]
    Unnamed { path: PathBuf },

    /// The discovery node list resolved to nothing.
    #[error("no discovery nodes configured")]
    NoDiscoveryNodes,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
