//! # meshreg-registrar
//!
//! Owns one discovery handle per instance key and performs the register,
//! cancel and health-check-or-cancel operations against the registry.
//!
//! The network sits behind [`Connector`] / [`DiscoveryClient`]; [`HttpConnector`]
//! talks to real registry nodes and [`DryRunConnector`] only logs.

pub mod client;
pub mod error;
pub mod http;
pub mod probe;
pub mod registrar;

pub use client::{Connector, DiscoveryClient, DryRunConnector};
pub use error::{ClientError, ProbeError, RegistrarError};
pub use http::HttpConnector;
pub use probe::{HealthProbe, HttpProbe, ProbePolarity};
pub use registrar::{HealthVerdict, Registrar};
