//! Per-instance discovery handle cache and the register/cancel operations.
//!
//! # Handle lifecycle
//!
//! - created on the first `register` or `cancel` for a key (get-or-create)
//! - reused by every later `register` for that key
//! - evicted at the end of `cancel` and `health_check_or_cancel`, whatever the
//!   registry answered
//!
//! Get-or-create runs under the map's shard write lock, so concurrent
//! registrations of an absent key build exactly one handle.

use std::sync::Arc;

use dashmap::DashMap;

use meshreg_core::descriptor::{self, InstanceDescriptor};
use meshreg_core::{InstanceKey, InstanceSnapshot};

use crate::client::{Connector, DiscoveryClient};
use crate::error::RegistrarError;
use crate::probe::HealthProbe;

/// Outcome of [`Registrar::health_check_or_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Probe passed; nothing was sent to the registry.
    Healthy,
    /// Probe failed or reported unhealthy; the instance was cancelled.
    Cancelled,
}

pub struct Registrar {
    clients: DashMap<InstanceKey, Arc<dyn DiscoveryClient>>,
    connector: Arc<dyn Connector>,
    probe: Arc<dyn HealthProbe>,
}

impl Registrar {
    pub fn new(connector: Arc<dyn Connector>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            clients: DashMap::new(),
            connector,
            probe,
        }
    }

    /// Announce a running instance. The descriptor's status comes from the
    /// health probe. Errors are meant to be retried by the caller.
    pub fn register(&self, snapshot: &InstanceSnapshot) -> Result<(), RegistrarError> {
        let key = snapshot.key();
        let client = self.client_for(&key, snapshot)?;
        let instance = self.describe(snapshot, true);

        client
            .register(&instance)
            .map_err(|source| RegistrarError::Register {
                key: key.clone(),
                app_id: instance.app_id.clone(),
                source,
            })?;
        tracing::info!(key = %key, app_id = %instance.app_id, status = %instance.status, "instance registered");
        Ok(())
    }

    /// Withdraw an instance and drop its handle.
    ///
    /// Only a failure to create the handle is returned. The registry's own
    /// cancel error is logged and swallowed: once attempted, cancellation is
    /// considered complete.
    pub fn cancel(&self, snapshot: &InstanceSnapshot) -> Result<(), RegistrarError> {
        let key = snapshot.key();
        let result = self
            .client_for(&key, snapshot)
            .map(|client| self.send_cancel(&key, client.as_ref(), snapshot));
        self.evict(&key);
        result
    }

    /// Probe the instance and cancel it when the probe fails. The handle is
    /// evicted in both cases.
    pub fn health_check_or_cancel(
        &self,
        snapshot: &InstanceSnapshot,
    ) -> Result<HealthVerdict, RegistrarError> {
        let key = snapshot.key();
        let result = self.client_for(&key, snapshot).map(|client| {
            match self.probe.probe(snapshot) {
                Ok(true) => HealthVerdict::Healthy,
                Ok(false) => {
                    tracing::info!(key = %key, "instance unhealthy, cancelling");
                    self.send_cancel(&key, client.as_ref(), snapshot);
                    HealthVerdict::Cancelled
                }
                Err(err) => {
                    tracing::info!(key = %key, error = %err, "health probe failed, cancelling");
                    self.send_cancel(&key, client.as_ref(), snapshot);
                    HealthVerdict::Cancelled
                }
            }
        });
        self.evict(&key);
        result
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.clients.contains_key(key)
    }

    /// Keys with a live handle, sorted.
    pub fn keys(&self) -> Vec<InstanceKey> {
        let mut keys: Vec<_> = self.clients.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn client_for(
        &self,
        key: &InstanceKey,
        snapshot: &InstanceSnapshot,
    ) -> Result<Arc<dyn DiscoveryClient>, RegistrarError> {
        if let Some(existing) = self.clients.get(key) {
            return Ok(existing.value().clone());
        }
        let entry = self
            .clients
            .entry(key.clone())
            .or_try_insert_with(|| {
                tracing::debug!(key = %key, "creating discovery client");
                self.connector.connect(key, &snapshot.name)
            })
            .map_err(|source| RegistrarError::Connect {
                key: key.clone(),
                source,
            })?;
        Ok(entry.value().clone())
    }

    fn send_cancel(&self, key: &InstanceKey, client: &dyn DiscoveryClient, snapshot: &InstanceSnapshot) {
        let instance = self.describe(snapshot, false);
        match client.cancel(&instance.app_id) {
            Ok(()) => tracing::info!(key = %key, app_id = %instance.app_id, "instance cancelled"),
            Err(err) => tracing::warn!(
                key = %key,
                app_id = %instance.app_id,
                error = %err,
                "registry cancel failed; treating instance as cancelled",
            ),
        }
    }

    /// `with_probe == false` forces `NotReceiving`.
    fn describe(&self, snapshot: &InstanceSnapshot, with_probe: bool) -> InstanceDescriptor {
        let verdict = if with_probe {
            match self.probe.probe(snapshot) {
                Ok(healthy) => healthy,
                Err(err) => {
                    tracing::debug!(key = %snapshot.key(), error = %err, "health probe failed");
                    false
                }
            }
        } else {
            false
        };
        descriptor::build(snapshot, Some(verdict))
    }

    fn evict(&self, key: &InstanceKey) {
        if self.clients.remove(key).is_some() {
            tracing::debug!(key = %key, "discovery client evicted");
        }
    }
}
