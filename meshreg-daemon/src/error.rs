use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, manifest source and status API.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("manifest error: {0}")]
    Core(#[from] meshreg_core::CoreError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("task error: {0}")]
    Task(String),

    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
