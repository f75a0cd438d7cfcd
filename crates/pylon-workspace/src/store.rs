//! Workspace Store (§4.2): a durable tree of Workspaces → Conversations,
//! owned by a single Pylon (Worker process). CRUD plus index allocation
//! with gap reuse. The store is deliberately I/O-free — it holds state
//! under a `RwLock` and exposes `snapshot`/`restore` so a caller (the
//! `worker` binary) can layer atomic file persistence on top, mirroring
//! the gateway's `SessionStore` file-store pattern without baking the
//! filesystem into this type.

use std::collections::HashSet;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pylon_domain::entities::{Conversation, ConversationStatus, PermissionMode, Workspace};
use pylon_domain::error::{EntityKind, Error, Result};
use pylon_domain::id::{self, ConvId, PylonId, WorkspaceId};

/// The full persisted shape of one Pylon's Workspace Store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub workspaces: Vec<Workspace>,
    pub active_workspace: Option<WorkspaceId>,
    pub active_conversation: Option<ConvId>,
}

struct State {
    workspaces: Vec<Workspace>,
    active_workspace: Option<WorkspaceId>,
    active_conversation: Option<ConvId>,
}

pub struct WorkspaceStore {
    pylon: PylonId,
    state: RwLock<State>,
}

impl WorkspaceStore {
    pub fn new(pylon: PylonId) -> Self {
        Self {
            pylon,
            state: RwLock::new(State {
                workspaces: Vec::new(),
                active_workspace: None,
                active_conversation: None,
            }),
        }
    }

    pub fn from_snapshot(pylon: PylonId, snapshot: WorkspaceSnapshot) -> Self {
        Self {
            pylon,
            state: RwLock::new(State {
                workspaces: snapshot.workspaces,
                active_workspace: snapshot.active_workspace,
                active_conversation: snapshot.active_conversation,
            }),
        }
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let state = self.state.read();
        WorkspaceSnapshot {
            workspaces: state.workspaces.clone(),
            active_workspace: state.active_workspace,
            active_conversation: state.active_conversation,
        }
    }

    // ── Workspace CRUD ───────────────────────────────────────────────

    /// Smallest free `workspaceIndex` in `1..=127`.
    pub fn allocate_workspace_index(&self) -> Result<u8> {
        let state = self.state.read();
        let used: HashSet<u8> = state
            .workspaces
            .iter()
            .map(|w| id::decode_workspace(w.id).workspace_index)
            .collect();
        (1..=127u8)
            .find(|idx| !used.contains(idx))
            .ok_or(Error::IdExhausted { kind: "workspace" })
    }

    pub fn create_workspace(
        &self,
        name: impl Into<String>,
        working_dir: impl Into<std::path::PathBuf>,
    ) -> Result<WorkspaceId> {
        let index = self.allocate_workspace_index()?;
        let ws_id = id::encode_workspace(self.pylon, index)?;
        let workspace = Workspace {
            id: ws_id,
            name: name.into(),
            working_dir: working_dir.into(),
            conversations: Vec::new(),
        };

        let mut state = self.state.write();
        state.workspaces.push(workspace);
        if state.active_workspace.is_none() {
            state.active_workspace = Some(ws_id);
        }
        Ok(ws_id)
    }

    pub fn rename_workspace(&self, id: WorkspaceId, name: impl Into<String>) -> Result<()> {
        let mut state = self.state.write();
        let ws = find_workspace_mut(&mut state.workspaces, id)?;
        ws.name = name.into();
        Ok(())
    }

    /// Deletes the workspace, orphaning all its conversations. Its index
    /// is immediately reusable by the next `allocate_workspace_index`.
    pub fn delete_workspace(&self, id: WorkspaceId) -> Result<()> {
        let mut state = self.state.write();
        let before = state.workspaces.len();
        state.workspaces.retain(|w| w.id != id);
        if state.workspaces.len() == before {
            return Err(Error::not_found(EntityKind::Workspace, id.raw().to_string()));
        }
        if state.active_workspace == Some(id) {
            state.active_workspace = None;
            state.active_conversation = None;
        }
        Ok(())
    }

    pub fn get_workspace(&self, id: WorkspaceId) -> Option<Workspace> {
        self.state
            .read()
            .workspaces
            .iter()
            .find(|w| w.id == id)
            .cloned()
    }

    /// Creation-ordered snapshot of every workspace.
    pub fn list_workspaces(&self) -> Vec<Workspace> {
        self.state.read().workspaces.clone()
    }

    // ── Conversation CRUD ────────────────────────────────────────────

    /// Smallest free `convIndex` in `1..=1023` within `workspace`.
    pub fn allocate_conversation_index(&self, workspace: WorkspaceId) -> Result<u16> {
        let state = self.state.read();
        let ws = find_workspace(&state.workspaces, workspace)?;
        let used: HashSet<u16> = ws
            .conversations
            .iter()
            .map(|c| id::decode_conversation_full(c.id).conv_index)
            .collect();
        (1..=1023u16)
            .find(|idx| !used.contains(idx))
            .ok_or(Error::IdExhausted { kind: "conversation" })
    }

    pub fn create_conversation(
        &self,
        workspace: WorkspaceId,
        name: impl Into<String>,
    ) -> Result<ConvId> {
        let index = self.allocate_conversation_index(workspace)?;
        let conv_id = id::encode_conversation(workspace, index)?;

        let mut state = self.state.write();
        let ws = find_workspace_mut(&mut state.workspaces, workspace)?;
        ws.conversations
            .push(Conversation::new(conv_id, name, Utc::now()));

        if state.active_workspace == Some(workspace) && state.active_conversation.is_none() {
            state.active_conversation = Some(conv_id);
        }
        Ok(conv_id)
    }

    /// Deletes the conversation; its index is immediately reusable.
    pub fn delete_conversation(&self, id: ConvId) -> Result<()> {
        let mut state = self.state.write();
        let ws = find_workspace_mut(&mut state.workspaces, id.workspace())?;
        let before = ws.conversations.len();
        ws.conversations.retain(|c| c.id != id);
        if ws.conversations.len() == before {
            return Err(Error::not_found(EntityKind::Conversation, id.raw().to_string()));
        }
        if state.active_conversation == Some(id) {
            state.active_conversation = None;
        }
        Ok(())
    }

    pub fn get_conversation(&self, id: ConvId) -> Option<Conversation> {
        let state = self.state.read();
        find_workspace(&state.workspaces, id.workspace())
            .ok()
            .and_then(|ws| ws.find_conversation(id).cloned())
    }

    pub fn list_conversations(&self, workspace: WorkspaceId) -> Result<Vec<Conversation>> {
        let state = self.state.read();
        Ok(find_workspace(&state.workspaces, workspace)?
            .conversations
            .clone())
    }

    // ── Per-conversation property setters ───────────────────────────

    pub fn set_status(&self, id: ConvId, status: ConversationStatus) -> Result<()> {
        self.with_conversation_mut(id, |c| c.status = status)
    }

    pub fn set_unread(&self, id: ConvId, unread: bool) -> Result<()> {
        self.with_conversation_mut(id, |c| c.unread = unread)
    }

    pub fn set_claude_session_id(&self, id: ConvId, session_id: Option<String>) -> Result<()> {
        self.with_conversation_mut(id, |c| c.claude_session_id = session_id)
    }

    pub fn set_permission_mode(&self, id: ConvId, mode: PermissionMode) -> Result<()> {
        self.with_conversation_mut(id, |c| c.permission_mode = mode)
    }

    pub fn set_custom_system_prompt(&self, id: ConvId, prompt: Option<String>) -> Result<()> {
        self.with_conversation_mut(id, |c| c.custom_system_prompt = prompt)
    }

    /// Normalizes `path` (trim, `/` -> `\`); fails on an empty normalized
    /// path; a duplicate normalized path is a no-op success (spec: "already
    /// linked" without mutation).
    pub fn link_document(&self, id: ConvId, path: &str) -> Result<()> {
        let normalized = normalize_path(path);
        if normalized.is_empty() {
            return Err(Error::not_found(EntityKind::Document, "<empty>"));
        }
        self.with_conversation_mut(id, |c| {
            if !c.linked_documents.contains(&normalized) {
                c.linked_documents.push(normalized.clone());
            }
        })
    }

    pub fn unlink_document(&self, id: ConvId, path: &str) -> Result<()> {
        let normalized = normalize_path(path);
        self.with_conversation_mut(id, |c| {
            c.linked_documents.retain(|p| p != &normalized);
        })
    }

    pub fn list_documents(&self, id: ConvId) -> Result<Vec<String>> {
        self.get_conversation(id)
            .map(|c| c.linked_documents)
            .ok_or_else(|| Error::not_found(EntityKind::Conversation, id.raw().to_string()))
    }

    // ── Active workspace / conversation ─────────────────────────────

    /// Sets the active pair. If `conv_id` is omitted or not found in
    /// `workspace`, the workspace's first conversation becomes active
    /// (or `None` if it has none).
    pub fn set_active_workspace(&self, workspace: WorkspaceId, conv_id: Option<ConvId>) -> Result<()> {
        let mut state = self.state.write();
        let ws = find_workspace(&state.workspaces, workspace)?;

        let resolved = match conv_id {
            Some(id) if ws.find_conversation(id).is_some() => Some(id),
            _ => ws.conversations.first().map(|c| c.id),
        };

        state.active_workspace = Some(workspace);
        state.active_conversation = resolved;
        Ok(())
    }

    pub fn active(&self) -> (Option<WorkspaceId>, Option<ConvId>) {
        let state = self.state.read();
        (state.active_workspace, state.active_conversation)
    }

    /// Transitions every `working`/`waiting` conversation to `idle`.
    /// Called at Worker startup; returns the affected `convId`s.
    pub fn reset_active_conversations(&self) -> Vec<ConvId> {
        let mut state = self.state.write();
        let mut affected = Vec::new();
        for ws in state.workspaces.iter_mut() {
            for conv in ws.conversations.iter_mut() {
                if matches!(
                    conv.status,
                    ConversationStatus::Working | ConversationStatus::Waiting
                ) {
                    conv.status = ConversationStatus::Idle;
                    affected.push(conv.id);
                }
            }
        }
        affected
    }

    fn with_conversation_mut(&self, id: ConvId, f: impl FnOnce(&mut Conversation)) -> Result<()> {
        let mut state = self.state.write();
        let ws = find_workspace_mut(&mut state.workspaces, id.workspace())?;
        let conv = ws
            .find_conversation_mut(id)
            .ok_or_else(|| Error::not_found(EntityKind::Conversation, id.raw().to_string()))?;
        f(conv);
        Ok(())
    }
}

fn find_workspace(workspaces: &[Workspace], id: WorkspaceId) -> Result<&Workspace> {
    workspaces
        .iter()
        .find(|w| w.id == id)
        .ok_or_else(|| Error::not_found(EntityKind::Workspace, id.raw().to_string()))
}

fn find_workspace_mut(workspaces: &mut [Workspace], id: WorkspaceId) -> Result<&mut Workspace> {
    workspaces
        .iter_mut()
        .find(|w| w.id == id)
        .ok_or_else(|| Error::not_found(EntityKind::Workspace, id.raw().to_string()))
}

fn normalize_path(path: &str) -> String {
    path.trim().replace('/', "\\")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_domain::id::{encode_pylon, Env};

    fn pylon() -> PylonId {
        encode_pylon(Env::Dev, 1).unwrap()
    }

    #[test]
    fn create_workspace_allocates_smallest_free_index() {
        let store = WorkspaceStore::new(pylon());
        let ws1 = store.create_workspace("w1", "/tmp/w1").unwrap();
        assert_eq!(id::decode_workspace(ws1).workspace_index, 1);
        let ws2 = store.create_workspace("w2", "/tmp/w2").unwrap();
        assert_eq!(id::decode_workspace(ws2).workspace_index, 2);
    }

    #[test]
    fn index_gap_reuse_scenario() {
        let store = WorkspaceStore::new(pylon());
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.create_workspace(format!("w{i}"), "/tmp").unwrap());
        }
        // Delete indices 2 and 4 (1-indexed workspace_index).
        store.delete_workspace(ids[1]).unwrap();
        store.delete_workspace(ids[3]).unwrap();

        let next1 = store.create_workspace("re1", "/tmp").unwrap();
        let next2 = store.create_workspace("re2", "/tmp").unwrap();
        assert_eq!(id::decode_workspace(next1).workspace_index, 2);
        assert_eq!(id::decode_workspace(next2).workspace_index, 4);
    }

    #[test]
    fn workspace_index_exhaustion() {
        let store = WorkspaceStore::new(pylon());
        for _ in 1..=127 {
            store.create_workspace("w", "/tmp").unwrap();
        }
        let err = store.create_workspace("overflow", "/tmp");
        assert!(matches!(err, Err(Error::IdExhausted { .. })));

        // Delete #42 and confirm it is reused next.
        let workspaces = store.list_workspaces();
        let ws42 = workspaces
            .iter()
            .find(|w| id::decode_workspace(w.id).workspace_index == 42)
            .unwrap()
            .id;
        store.delete_workspace(ws42).unwrap();
        let reused = store.create_workspace("reused", "/tmp").unwrap();
        assert_eq!(id::decode_workspace(reused).workspace_index, 42);
    }

    #[test]
    fn link_document_normalizes_and_dedupes() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        let conv = store.create_conversation(ws, "c").unwrap();

        store.link_document(conv, "  a/b.md  ").unwrap();
        let docs = store.list_documents(conv).unwrap();
        assert_eq!(docs, vec!["a\\b.md".to_string()]);

        // Duplicate (even with different whitespace/slashes) is a no-op.
        store.link_document(conv, "a\\b.md").unwrap();
        assert_eq!(store.list_documents(conv).unwrap().len(), 1);
    }

    #[test]
    fn link_document_rejects_empty_normalized_path() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        let conv = store.create_conversation(ws, "c").unwrap();
        assert!(store.link_document(conv, "   ").is_err());
    }

    #[test]
    fn set_active_workspace_defaults_to_first_conversation() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        let conv = store.create_conversation(ws, "c").unwrap();

        store.set_active_workspace(ws, None).unwrap();
        assert_eq!(store.active(), (Some(ws), Some(conv)));
    }

    #[test]
    fn set_active_workspace_with_unknown_conv_falls_back() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        let conv = store.create_conversation(ws, "c").unwrap();
        let other_ws = store.create_workspace("w2", "/tmp").unwrap();
        let other_conv = store.create_conversation(other_ws, "oc").unwrap();

        store.set_active_workspace(ws, Some(other_conv)).unwrap();
        assert_eq!(store.active(), (Some(ws), Some(conv)));
    }

    #[test]
    fn reset_active_conversations_only_touches_working_and_waiting() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        let working = store.create_conversation(ws, "c1").unwrap();
        let idle = store.create_conversation(ws, "c2").unwrap();
        store.set_status(working, ConversationStatus::Working).unwrap();
        store.set_status(idle, ConversationStatus::Idle).unwrap();

        let affected = store.reset_active_conversations();
        assert_eq!(affected, vec![working]);
        assert_eq!(
            store.get_conversation(working).unwrap().status,
            ConversationStatus::Idle
        );
    }

    #[test]
    fn delete_workspace_orphans_conversations_without_error() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        store.create_conversation(ws, "c").unwrap();
        store.delete_workspace(ws).unwrap();
        assert!(store.get_workspace(ws).is_none());
    }

    #[test]
    fn snapshot_round_trips_through_from_snapshot() {
        let store = WorkspaceStore::new(pylon());
        let ws = store.create_workspace("w", "/tmp").unwrap();
        store.create_conversation(ws, "c").unwrap();

        let snapshot = store.snapshot();
        let restored = WorkspaceStore::from_snapshot(pylon(), snapshot);
        assert_eq!(restored.list_workspaces().len(), 1);
        assert_eq!(restored.active(), store.active());
    }
}
