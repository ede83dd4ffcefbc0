//! Manifest-directory notification source.
//!
//! Each `*.yaml` / `*.yml` file below the root holds one instance snapshot.
//! The initial listing is reported as `Added`; afterwards file creation,
//! modification and removal become `Added`, `Updated` and `Deleted`. A
//! rewrite that parses to the same snapshot produces nothing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};

use meshreg_core::{manifest, InstanceSnapshot};

use crate::dispatcher::{Notification, Payload};
use crate::error::{io_err, DaemonError};

/// Last parsed snapshot per manifest file.
pub struct ManifestSource {
    root: PathBuf,
    known: HashMap<PathBuf, InstanceSnapshot>,
}

impl ManifestSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            known: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every manifest currently on disk. Unreadable files are skipped.
    pub fn initial(&mut self) -> Result<Vec<Notification>, DaemonError> {
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let mut notifications = Vec::new();
        for path in manifest::manifest_paths(&self.root)? {
            match manifest::load_snapshot_at(&path) {
                Ok(snapshot) => {
                    self.known.insert(path, snapshot.clone());
                    notifications.push(Notification::Added(Payload::Instance(snapshot)));
                }
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping manifest"),
            }
        }
        Ok(notifications)
    }

    /// Re-read `path` and report what changed. Usually zero or one
    /// notification; two when a file now describes a different instance.
    pub fn on_path_changed(&mut self, path: &Path) -> Vec<Notification> {
        if !manifest::is_manifest(path) {
            return vec![];
        }
        if !path.exists() {
            return self
                .known
                .remove(path)
                .map(|last| Notification::Deleted(Payload::Instance(last)))
                .into_iter()
                .collect();
        }

        let snapshot = match manifest::load_snapshot_at(path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping manifest");
                return vec![];
            }
        };

        match self.known.insert(path.to_path_buf(), snapshot.clone()) {
            None => vec![Notification::Added(Payload::Instance(snapshot))],
            Some(old) if old == snapshot => vec![],
            Some(old) if old.key() != snapshot.key() => {
                tracing::info!(path = %path.display(), from = %old.key(), to = %snapshot.key(), "manifest now describes another instance");
                vec![
                    Notification::Deleted(Payload::Instance(old)),
                    Notification::Added(Payload::Instance(snapshot)),
                ]
            }
            Some(old) => vec![Notification::Updated {
                old: Payload::Instance(old),
                new: Payload::Instance(snapshot),
            }],
        }
    }
}

/// Watch `root` and forward notifications until shutdown.
pub async fn source_task(
    root: PathBuf,
    notify_tx: mpsc::Sender<Notification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    // Event paths arrive canonicalized on some platforms.
    let root = fs::canonicalize(&root).unwrap_or(root);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let mut source = ManifestSource::new(&root);
    let initial = source.initial()?;
    tracing::info!(root = %root.display(), instances = initial.len(), "manifest source started");
    for notification in initial {
        forward(&notify_tx, notification).await?;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    for notification in source.on_path_changed(&path) {
                        forward(&notify_tx, notification).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn forward(tx: &mpsc::Sender<Notification>, notification: Notification) -> Result<(), DaemonError> {
    tx.send(notification)
        .await
        .map_err(|_| DaemonError::ChannelClosed("notifications"))
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
