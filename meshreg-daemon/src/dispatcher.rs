//! Turns instance notifications into registrar calls.
//!
//! | Notification           | Condition                                   | Call     |
//! |------------------------|---------------------------------------------|----------|
//! | `Added`                | phase is Running                            | register |
//! | `Updated { old, new }` | same resource version or same phase         | none     |
//! |                        | old Running, new not Running                | cancel   |
//! |                        | new Running, old not Running                | register |
//! | `Deleted`              | always                                      | cancel   |
//!
//! A failed call enqueues one rate-limited retry carrying the snapshot.
//! Payloads that are not instances are rejected, never panicked on.

use std::fmt;
use std::sync::Arc;

use meshreg_core::{InstanceKey, InstanceSnapshot};
use meshreg_registrar::Registrar;

use crate::queue::{Action, RetryQueue, WorkItem, WorkKey};

/// Object carried by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Instance(InstanceSnapshot),
    /// Deletion observed late; `last_known` is the final state, when any.
    Tombstone {
        key: String,
        last_known: Option<InstanceSnapshot>,
    },
    Other { kind: String },
}

impl Payload {
    /// The instance this payload describes, if any.
    pub fn narrow(&self) -> Option<&InstanceSnapshot> {
        match self {
            Payload::Instance(snapshot) => Some(snapshot),
            Payload::Tombstone { last_known, .. } => last_known.as_ref(),
            Payload::Other { .. } => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Payload::Instance(_) => "instance",
            Payload::Tombstone { .. } => "tombstone",
            Payload::Other { kind } => kind,
        }
    }

    pub fn key(&self) -> Option<InstanceKey> {
        match self {
            Payload::Instance(snapshot) => Some(snapshot.key()),
            Payload::Tombstone { key, .. } => Some(InstanceKey::from(key.as_str())),
            Payload::Other { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Added(Payload),
    Updated { old: Payload, new: Payload },
    Deleted(Payload),
}

impl Notification {
    pub fn label(&self) -> &'static str {
        match self {
            Notification::Added(_) => "added",
            Notification::Updated { .. } => "updated",
            Notification::Deleted(_) => "deleted",
        }
    }

    /// Current payload: the new side of an update.
    pub fn payload(&self) -> &Payload {
        match self {
            Notification::Added(p) | Notification::Deleted(p) => p,
            Notification::Updated { new, .. } => new,
        }
    }
}

/// Why a notification produced no registrar call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotRunning,
    SameResourceVersion,
    SamePhase,
    NoRunningEdge,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Skip::NotRunning => "not running",
            Skip::SameResourceVersion => "same resource version",
            Skip::SamePhase => "same phase",
            Skip::NoRunningEdge => "no running edge",
        };
        f.write_str(text)
    }
}

/// What the dispatcher did with one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Registered(InstanceKey),
    Cancelled(InstanceKey),
    /// The call failed and a retry was enqueued.
    Requeued(WorkKey),
    Skipped(Skip),
    Rejected { kind: String },
}

impl Decision {
    pub fn is_requeued(&self) -> bool {
        matches!(self, Decision::Requeued(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Registered(key) => write!(f, "registered {key}"),
            Decision::Cancelled(key) => write!(f, "cancelled {key}"),
            Decision::Requeued(item) => write!(f, "requeued {item}"),
            Decision::Skipped(reason) => write!(f, "skipped ({reason})"),
            Decision::Rejected { kind } => write!(f, "rejected non-instance payload '{kind}'"),
        }
    }
}

pub struct Dispatcher {
    registrar: Arc<Registrar>,
    queue: Arc<RetryQueue>,
}

impl Dispatcher {
    pub fn new(registrar: Arc<Registrar>, queue: Arc<RetryQueue>) -> Self {
        Self { registrar, queue }
    }

    pub fn registrar(&self) -> &Arc<Registrar> {
        &self.registrar
    }

    /// Narrow the notification's payloads and route them. Blocking.
    pub fn handle(&self, notification: &Notification) -> Decision {
        let decision = match notification {
            Notification::Added(payload) => match payload {
                Payload::Instance(snapshot) => self.on_add(snapshot),
                other => reject(other),
            },
            Notification::Updated { old, new } => match (old, new) {
                (Payload::Instance(old), Payload::Instance(new)) => self.on_update(old, new),
                (Payload::Instance(_), other) => reject(other),
                (other, _) => reject(other),
            },
            Notification::Deleted(payload) => match payload.narrow() {
                Some(snapshot) => self.on_delete(snapshot),
                None => reject(payload),
            },
        };
        if let Decision::Rejected { kind } = &decision {
            tracing::warn!(event = notification.label(), kind = %kind, "rejected notification");
        } else {
            tracing::debug!(event = notification.label(), decision = %decision, "notification handled");
        }
        decision
    }

    pub fn on_add(&self, snapshot: &InstanceSnapshot) -> Decision {
        if !snapshot.is_running() {
            return Decision::Skipped(Skip::NotRunning);
        }
        self.register(snapshot)
    }

    pub fn on_update(&self, old: &InstanceSnapshot, new: &InstanceSnapshot) -> Decision {
        if old.resource_version == new.resource_version {
            return Decision::Skipped(Skip::SameResourceVersion);
        }
        if old.phase == new.phase {
            return Decision::Skipped(Skip::SamePhase);
        }
        match (old.is_running(), new.is_running()) {
            (true, false) => self.cancel(new),
            (false, true) => self.register(new),
            _ => Decision::Skipped(Skip::NoRunningEdge),
        }
    }

    pub fn on_delete(&self, snapshot: &InstanceSnapshot) -> Decision {
        self.cancel(snapshot)
    }

    /// Re-run the handling that produced `item`.
    pub fn replay(&self, item: &WorkItem) -> Decision {
        match item.action {
            Action::Register => self.on_add(&item.snapshot),
            Action::Cancel => self.on_delete(&item.snapshot),
        }
    }

    fn register(&self, snapshot: &InstanceSnapshot) -> Decision {
        match self.registrar.register(snapshot) {
            Ok(()) => Decision::Registered(snapshot.key()),
            Err(err) => {
                tracing::warn!(key = %err.key(), error = %err, "register failed, will retry");
                self.requeue(Action::Register, snapshot)
            }
        }
    }

    fn cancel(&self, snapshot: &InstanceSnapshot) -> Decision {
        match self.registrar.cancel(snapshot) {
            Ok(()) => Decision::Cancelled(snapshot.key()),
            Err(err) => {
                tracing::warn!(key = %err.key(), error = %err, "cancel failed, will retry");
                self.requeue(Action::Cancel, snapshot)
            }
        }
    }

    fn requeue(&self, action: Action, snapshot: &InstanceSnapshot) -> Decision {
        let item = WorkItem::new(action, snapshot.clone());
        let key = item.work_key();
        self.queue.add_rate_limited(item);
        Decision::Requeued(key)
    }
}

fn reject(payload: &Payload) -> Decision {
    Decision::Rejected {
        kind: payload.kind().to_string(),
    }
}
