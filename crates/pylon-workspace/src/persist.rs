//! Atomic persistence for a [`WorkspaceSnapshot`] (§4.2): "JSON projection
//! is stable enough to be written atomically (temp-file + rename) by
//! callers; the store itself is I/O-free." These are the `load`/`save`
//! free functions the `worker` binary calls around every mutating
//! `WorkspaceStore` operation, mirroring the gateway's file-store pattern
//! without putting a `Path` inside the store type.

use std::fs;
use std::path::Path;

use pylon_domain::error::{Error, Result};

use crate::store::WorkspaceSnapshot;

/// Reads and deserializes a snapshot from `path`. A missing file yields an
/// empty snapshot (first run).
pub fn load_snapshot(path: &Path) -> Result<WorkspaceSnapshot> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|_| Error::InvalidJson),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(WorkspaceSnapshot::default()),
        Err(err) => Err(Error::Io(err)),
    }
}

/// Writes `snapshot` to `path` via a sibling temp file followed by an
/// atomic rename, so a crash mid-write never leaves a truncated or
/// half-written store on disk.
pub fn save_snapshot_atomic(path: &Path, snapshot: &WorkspaceSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let serialized = serde_json::to_string_pretty(snapshot).map_err(|_| Error::InvalidJson)?;
    fs::write(&tmp_path, serialized)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace-store".to_string());
    path.with_file_name(format!("{file_name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_domain::entities::Workspace;
    use pylon_domain::id::{encode_pylon, encode_workspace, Env};

    #[test]
    fn load_missing_file_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let snapshot = load_snapshot(&path).unwrap();
        assert!(snapshot.workspaces.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let ws_id = encode_workspace(pylon, 1).unwrap();
        let snapshot = WorkspaceSnapshot {
            workspaces: vec![Workspace {
                id: ws_id,
                name: "w".into(),
                working_dir: "/tmp".into(),
                conversations: Vec::new(),
            }],
            active_workspace: Some(ws_id),
            active_conversation: None,
        };

        save_snapshot_atomic(&path, &snapshot).unwrap();
        let restored = load_snapshot(&path).unwrap();
        assert_eq!(restored.workspaces.len(), 1);
        assert_eq!(restored.active_workspace, Some(ws_id));

        // No leftover temp file.
        assert!(!path.with_file_name("store.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_yields_invalid_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_snapshot(&path), Err(Error::InvalidJson)));
    }
}
