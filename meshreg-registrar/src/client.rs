//! Discovery client seam.
//!
//! A [`Connector`] builds one [`DiscoveryClient`] per instance key. The
//! registrar never talks to the network except through these two traits.

use std::sync::Arc;

use meshreg_core::{InstanceDescriptor, InstanceKey};

use crate::error::ClientError;

/// Live registry handle bound to a single instance.
///
/// Calls block until the registry answers. Dropping the handle releases
/// whatever it owns (renewal threads, connections).
pub trait DiscoveryClient: Send + Sync {
    fn register(&self, instance: &InstanceDescriptor) -> Result<(), ClientError>;

    fn cancel(&self, app_id: &str) -> Result<(), ClientError>;
}

/// Factory for per-instance handles.
pub trait Connector: Send + Sync {
    /// `hostname` is the instance name the handle announces itself as.
    fn connect(
        &self,
        key: &InstanceKey,
        hostname: &str,
    ) -> Result<Arc<dyn DiscoveryClient>, ClientError>;
}

/// Connector whose handles only log. Used by `meshreg run --dry-run`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunConnector;

impl Connector for DryRunConnector {
    fn connect(
        &self,
        key: &InstanceKey,
        hostname: &str,
    ) -> Result<Arc<dyn DiscoveryClient>, ClientError> {
        tracing::debug!(key = %key, hostname, "dry-run discovery client created");
        Ok(Arc::new(DryRunClient {
            key: key.clone(),
        }))
    }
}

struct DryRunClient {
    key: InstanceKey,
}

impl DiscoveryClient for DryRunClient {
    fn register(&self, instance: &InstanceDescriptor) -> Result<(), ClientError> {
        tracing::info!(
            key = %self.key,
            app_id = %instance.app_id,
            addrs = ?instance.addrs,
            status = %instance.status,
            "[dry-run] register",
        );
        Ok(())
    }

    fn cancel(&self, app_id: &str) -> Result<(), ClientError> {
        tracing::info!(key = %self.key, app_id, "[dry-run] cancel");
        Ok(())
    }
}
