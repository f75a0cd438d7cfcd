//! Core entities (§3.2): Workspace, Conversation, Message, and the
//! registry-owned records held by Beacon and Relay. Entities are pure data
//! — no entity type performs I/O; the stores in `pylon-workspace` and
//! `pylon-messages` own persistence.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ConvId, WorkspaceId};

/// A named root with a working directory and an ordered list of
/// conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub working_dir: PathBuf,
    pub conversations: Vec<Conversation>,
}

impl Workspace {
    pub fn find_conversation(&self, id: ConvId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn find_conversation_mut(&mut self, id: ConvId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Idle,
    Working,
    Waiting,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
}

/// A single ordered message thread; the smallest routable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConvId,
    pub name: String,
    pub claude_session_id: Option<String>,
    pub status: ConversationStatus,
    pub unread: bool,
    pub permission_mode: PermissionMode,
    pub created_at: DateTime<Utc>,
    /// Ordered, de-duplicated by normalized path.
    pub linked_documents: Vec<String>,
    pub custom_system_prompt: Option<String>,
}

impl Conversation {
    pub fn new(id: ConvId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            claude_session_id: None,
            status: ConversationStatus::Idle,
            unread: false,
            permission_mode: PermissionMode::Default,
            created_at,
            linked_documents: Vec::new(),
            custom_system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// An immutable append record in a conversation's message log (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

/// The tagged variant over a message's content. Tool messages carry a
/// *summarized* `tool_input` (see `pylon_messages::summarize`), never the
/// raw SDK payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageBody {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
    },
    ToolStart {
        tool_name: String,
        tool_input: Value,
        parent_tool_use_id: Option<String>,
    },
    ToolComplete {
        tool_name: String,
        tool_input: Value,
        parent_tool_use_id: Option<String>,
        success: bool,
        output: Option<String>,
        error: Option<String>,
    },
    SystemError {
        message: String,
    },
    Result {
        duration_ms: u64,
        success: bool,
    },
    Aborted {
        reason: String,
    },
    FileAttachment {
        path: String,
        description: Option<String>,
    },
    UserResponse {
        tool_use_id: String,
        answer: String,
    },
    SystemNote {
        text: String,
    },
}

impl MessageBody {
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            MessageBody::ToolStart { tool_name, .. } => Some(tool_name),
            MessageBody::ToolComplete { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }
}

/// Beacon-owned: `toolUseId -> { convId, rawToolUse }`. Created when a
/// `tool_use` content block starts; entries persist for the lifetime of
/// the Beacon process because the MCP callback may arrive asynchronously
/// after the turn ends.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conv_id: ConvId,
    pub raw_tool_use: Value,
}

/// Beacon-owned: `pylonId -> { mcpHost, mcpPort }`. Survives TCP
/// disconnect; dropped only on explicit `unregister` or Beacon shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PylonConnection {
    pub mcp_host: String,
    pub mcp_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Pylon,
    App,
    Viewer,
}

/// Relay-owned: `connId -> { ip, deviceIndex, deviceType, authenticated,
/// shareId?, email? }`. Disconnect removes the entry.
#[derive(Debug, Clone)]
pub struct RelayClient {
    pub ip: String,
    pub device_index: u8,
    pub device_type: DeviceType,
    pub authenticated: bool,
    pub share_id: Option<String>,
    pub email: Option<String>,
}

/// A human's decision on a pending permission request (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionDecision {
    Allow,
    Deny,
    AllowAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_tags_on_type_field() {
        let body = MessageBody::ToolStart {
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "ls"}),
            parent_tool_use_id: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["type"], "toolStart");
        assert_eq!(value["toolName"], "Bash");
    }

    #[test]
    fn workspace_finds_conversation_by_id() {
        use crate::id::{encode_conversation, encode_pylon, encode_workspace, Env};
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let ws_id = encode_workspace(pylon, 1).unwrap();
        let conv_id = encode_conversation(ws_id, 1).unwrap();
        let ws = Workspace {
            id: ws_id,
            name: "w".into(),
            working_dir: "/tmp".into(),
            conversations: vec![Conversation::new(conv_id, "c1", Utc::now())],
        };
        assert!(ws.find_conversation(conv_id).is_some());
    }
}
