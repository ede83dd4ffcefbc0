//! meshreg core library — instance snapshots, descriptors, configuration, errors.
//!
//! - [`types`] — keys, phases and snapshots
//! - [`descriptor`] — snapshot → registry record mapping
//! - [`config`] — [`DiscoveryConfig`]
//! - [`manifest`] — snapshot documents on disk
//! - [`error`] — [`CoreError`]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::DiscoveryConfig;
pub use descriptor::{InstanceDescriptor, InstanceStatus};
pub use error::CoreError;
pub use types::{Container, ContainerStatus, EnvVar, InstanceKey, InstanceSnapshot, Phase};
