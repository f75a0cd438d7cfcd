//! Append-only per-conversation message log (§4.3).
//!
//! One JSONL file per conversation, directory-per-workspace, following the
//! teacher's `TranscriptWriter` pattern: each `append` does a single
//! buffered `write_all` of one JSON line, which is what makes "durable
//! before the call returns" cheap outside of the rarer trim-rewrite path.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use pylon_domain::entities::{Message, MessageBody, Role};
use pylon_domain::error::{Error, Result};
use pylon_domain::id::ConvId;

use crate::summarize::summarize_tool_output;

/// Every caller-observed window is bounded at this many messages; `append`
/// trims down to it immediately whenever a write pushes past it.
pub const MAX_MESSAGES_PER_SESSION: usize = 200;

pub struct MessageStore {
    base_dir: PathBuf,
    conversations: RwLock<HashMap<ConvId, Vec<Message>>>,
}

impl MessageStore {
    /// Opens (creating if needed) the message store rooted at `base_dir`,
    /// migrating any legacy per-conversation JSON files found under it.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        let store = Self {
            base_dir,
            conversations: RwLock::new(HashMap::new()),
        };
        store.migrate_legacy_files()?;
        Ok(store)
    }

    /// Appends a new message, returning it with its assigned `id` and
    /// `timestamp`. Trims the conversation down to
    /// [`MAX_MESSAGES_PER_SESSION`] if this push crossed the cap.
    pub fn append(&self, conv_id: ConvId, role: Role, body: MessageBody) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now(),
            body,
        };

        let mut conversations = self.conversations.write();
        let messages = self.load_or_get_mut(&mut conversations, conv_id)?;
        messages.push(message.clone());

        if messages.len() > MAX_MESSAGES_PER_SESSION {
            let overflow = messages.len() - MAX_MESSAGES_PER_SESSION;
            messages.drain(0..overflow);
            let path = self.conv_path(conv_id);
            rewrite_file(&path, messages)?;
        } else {
            self.append_line(conv_id, &message)?;
        }

        Ok(message)
    }

    /// Locates the most recent `toolStart` for `tool_name` and rewrites it
    /// in place to `toolComplete`, preserving `id`/`timestamp`/
    /// `parentToolUseId`. No-op (returns `false`) if none is found.
    pub fn update_tool_complete(
        &self,
        conv_id: ConvId,
        tool_name: &str,
        success: bool,
        output: Option<String>,
        error: Option<String>,
    ) -> Result<bool> {
        let mut conversations = self.conversations.write();
        let messages = self.load_or_get_mut(&mut conversations, conv_id)?;

        let target = messages.iter_mut().rev().find(|m| {
            matches!(
                &m.body,
                MessageBody::ToolStart { tool_name: tn, .. } if tn == tool_name
            )
        });

        let Some(message) = target else {
            return Ok(false);
        };

        if let MessageBody::ToolStart {
            tool_name,
            tool_input,
            parent_tool_use_id,
        } = message.body.clone()
        {
            message.body = MessageBody::ToolComplete {
                tool_name,
                tool_input,
                parent_tool_use_id,
                success,
                output: output.map(|s| summarize_tool_output(&s)),
                error,
            };
        }

        let path = self.conv_path(conv_id);
        rewrite_file(&path, messages)?;
        Ok(true)
    }

    /// A contiguous window from the tail, newest-last. `offset` skips that
    /// many of the most recent messages before taking `limit`.
    pub fn get_messages(&self, conv_id: ConvId, limit: usize, offset: usize) -> Result<Vec<Message>> {
        let mut conversations = self.conversations.write();
        let messages = self.load_or_get_mut(&mut conversations, conv_id)?;
        let len = messages.len();
        if offset >= len {
            return Ok(Vec::new());
        }
        let end = len - offset;
        let start = end.saturating_sub(limit);
        Ok(messages[start..end].to_vec())
    }

    pub fn get_latest_messages(&self, conv_id: ConvId, limit: usize) -> Result<Vec<Message>> {
        self.get_messages(conv_id, limit, 0)
    }

    /// The entire log in chronological order, for read-only viewers.
    pub fn get_shared_message_history(&self, conv_id: ConvId) -> Result<Vec<Message>> {
        let mut conversations = self.conversations.write();
        let messages = self.load_or_get_mut(&mut conversations, conv_id)?;
        Ok(messages.clone())
    }

    fn load_or_get_mut<'a>(
        &self,
        conversations: &'a mut HashMap<ConvId, Vec<Message>>,
        conv_id: ConvId,
    ) -> Result<&'a mut Vec<Message>> {
        if !conversations.contains_key(&conv_id) {
            let loaded = self.read_from_disk(conv_id)?;
            conversations.insert(conv_id, loaded);
        }
        Ok(conversations.get_mut(&conv_id).expect("just inserted"))
    }

    fn conv_dir(&self, workspace: u16) -> PathBuf {
        self.base_dir.join(workspace.to_string())
    }

    fn conv_path(&self, conv_id: ConvId) -> PathBuf {
        self.conv_dir(conv_id.workspace().raw())
            .join(format!("{}.jsonl", conv_id.raw()))
    }

    fn read_from_disk(&self, conv_id: ConvId) -> Result<Vec<Message>> {
        let path = self.conv_path(conv_id);
        read_jsonl(&path)
    }

    fn append_line(&self, conv_id: ConvId, message: &Message) -> Result<()> {
        let path = self.conv_path(conv_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(message).map_err(|_| Error::InvalidJson)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Scans every workspace subdirectory for pre-JSONL `<convId>.json`
    /// files, converts each into the new layout, and relocates the
    /// original into a sibling `legacy_backup/` directory. Skipped for a
    /// workspace whose backup directory already exists.
    fn migrate_legacy_files(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&self.base_dir)? {
            let ws_dir = entry?.path();
            if !ws_dir.is_dir() {
                continue;
            }

            let backup_dir = ws_dir.join("legacy_backup");
            if backup_dir.exists() {
                continue;
            }

            let legacy_files: Vec<PathBuf> = fs::read_dir(&ws_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect();

            if legacy_files.is_empty() {
                continue;
            }

            fs::create_dir_all(&backup_dir)?;
            for legacy_path in legacy_files {
                let raw = fs::read_to_string(&legacy_path)?;
                let messages: Vec<Message> =
                    serde_json::from_str(&raw).map_err(|_| Error::InvalidJson)?;

                let stem = legacy_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                let jsonl_path = ws_dir.join(format!("{stem}.jsonl"));
                rewrite_file(&jsonl_path, &messages)?;

                let file_name = legacy_path
                    .file_name()
                    .expect("legacy path has a file name");
                fs::rename(&legacy_path, backup_dir.join(file_name))?;

                tracing::info!(path = %jsonl_path.display(), "migrated legacy conversation file");
            }
        }

        Ok(())
    }
}

fn read_jsonl(path: &Path) -> Result<Vec<Message>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    let mut messages = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(message) => messages.push(message),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping malformed message line");
            }
        }
    }
    Ok(messages)
}

fn rewrite_file(path: &Path, messages: &[Message]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("jsonl.tmp");

    let mut buf = String::new();
    for message in messages {
        buf.push_str(&serde_json::to_string(message).map_err(|_| Error::InvalidJson)?);
        buf.push('\n');
    }
    fs::write(&tmp_path, buf)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
