//! Snapshot manifests on disk.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <namespace>/
//!     <name>.yaml      (one InstanceSnapshot per file)
//! ```
//!
//! The directory nesting is a convention only; any `*.yaml` / `*.yml` file
//! below `root` is loaded, and the key comes from the document itself.

use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::types::InstanceSnapshot;

/// `true` for `.yaml` / `.yml` files (case-insensitive).
pub fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Parse a single snapshot document.
///
/// Returns `CoreError::Parse` (with path + line context) on malformed YAML and
/// `CoreError::Unnamed` when the document has an empty `name`.
pub fn parse_snapshot(path: &Path, contents: &str) -> Result<InstanceSnapshot, CoreError> {
    let snapshot: InstanceSnapshot = serde_yaml::from_str(contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    if snapshot.name.is_empty() {
        return Err(CoreError::Unnamed {
            path: path.to_path_buf(),
        });
    }
    Ok(snapshot)
}

/// Load a snapshot from `path`.
pub fn load_snapshot_at(path: &Path) -> Result<InstanceSnapshot, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_snapshot(path, &contents)
}

/// Walk `root` and return every snapshot with the file it came from.
///
/// Results are sorted by path. A missing root yields an empty list; the first
/// unreadable or malformed file aborts the walk.
pub fn list_snapshots_at(root: &Path) -> Result<Vec<(PathBuf, InstanceSnapshot)>, CoreError> {
    if !root.exists() {
        return Ok(vec![]);
    }
    let mut result = Vec::new();
    for path in manifest_paths(root)? {
        let snapshot = load_snapshot_at(&path)?;
        result.push((path, snapshot));
    }
    Ok(result)
}

/// Every manifest file below `root`, sorted.
pub fn manifest_paths(root: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut dirs = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = dirs.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
            if ty.is_dir() {
                dirs.push(path);
            } else if is_manifest(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
