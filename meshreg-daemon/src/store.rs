//! Read-only view of the instances currently known to the daemon.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use meshreg_core::{InstanceKey, InstanceSnapshot};

use crate::dispatcher::{Notification, Payload};

#[derive(Default)]
pub struct InstanceStore {
    instances: RwLock<BTreeMap<InstanceKey, InstanceSnapshot>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one notification into the view. Non-instance payloads are ignored.
    pub async fn apply(&self, notification: &Notification) {
        let mut instances = self.instances.write().await;
        match notification {
            Notification::Added(Payload::Instance(snapshot))
            | Notification::Updated {
                new: Payload::Instance(snapshot),
                ..
            } => {
                instances.insert(snapshot.key(), snapshot.clone());
            }
            Notification::Deleted(payload) => {
                if let Some(key) = payload.key() {
                    instances.remove(&key);
                }
            }
            _ => {}
        }
    }

    /// All instances, ordered by key.
    pub async fn list(&self) -> Vec<InstanceSnapshot> {
        self.instances.read().await.values().cloned().collect()
    }

    pub async fn get(&self, key: &InstanceKey) -> Option<InstanceSnapshot> {
        self.instances.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshreg_core::Phase;

    fn snapshot(name: &str, rv: &str, phase: Phase) -> InstanceSnapshot {
        InstanceSnapshot {
            name: name.into(),
            namespace: "shop".into(),
            resource_version: rv.into(),
            phase,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tracks_add_update_delete() {
        let store = InstanceStore::new();
        let key = InstanceKey::from("shop/web-0");

        store
            .apply(&Notification::Added(Payload::Instance(snapshot("web-0", "1", Phase::Pending))))
            .await;
        store
            .apply(&Notification::Updated {
                old: Payload::Instance(snapshot("web-0", "1", Phase::Pending)),
                new: Payload::Instance(snapshot("web-0", "2", Phase::Running)),
            })
            .await;
        assert_eq!(store.get(&key).await.map(|s| s.phase), Some(Phase::Running));

        store
            .apply(&Notification::Deleted(Payload::Tombstone {
                key: "shop/web-0".into(),
                last_known: None,
            }))
            .await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn lists_in_key_order_and_ignores_other_payloads() {
        let store = InstanceStore::new();
        for name in ["web-2", "web-0", "web-1"] {
            store
                .apply(&Notification::Added(Payload::Instance(snapshot(name, "1", Phase::Running))))
                .await;
        }
        store
            .apply(&Notification::Added(Payload::Other { kind: "service".into() }))
            .await;

        let names: Vec<_> = store.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["web-0", "web-1", "web-2"]);
    }
}
