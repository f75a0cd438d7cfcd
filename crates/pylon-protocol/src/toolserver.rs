//! Worker tool server protocol (§6.3): TCP, newline-delimited JSON.
//! Receives actions from MCP tool callbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ToolServerRequest {
    Link {
        conv_id: u32,
        path: String,
    },
    Unlink {
        conv_id: u32,
        path: String,
    },
    List {
        conv_id: u32,
    },
    SendFile {
        conv_id: u32,
        path: String,
        #[serde(default)]
        description: Option<String>,
    },
    GetStatus {
        conv_id: u32,
    },
    /// Resolves `toolUseId -> convId` via Beacon's `lookup` before acting.
    LookupAndLink {
        tool_use_id: String,
        path: String,
    },
    LookupAndUnlink {
        tool_use_id: String,
        path: String,
    },
    LookupAndList {
        tool_use_id: String,
    },
    LookupAndSendFile {
        tool_use_id: String,
        path: String,
        #[serde(default)]
        description: Option<String>,
    },
    LookupAndGetStatus {
        tool_use_id: String,
    },
    /// Fires an `onConversationCreate(convId)` callback on success.
    LookupAndCreateConversation {
        tool_use_id: String,
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conv_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl ToolServerResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn unknown_action(raw: &str) -> Self {
        Self::err(format!("Unknown action: {raw}"))
    }

    pub fn invalid_json() -> Self {
        Self::err("Invalid JSON format")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_parses_conv_id_and_path() {
        let line = r#"{"action":"link","conv_id":42,"path":"/a/b.md"}"#;
        let req: ToolServerRequest = serde_json::from_str(line).unwrap();
        assert!(matches!(req, ToolServerRequest::Link { conv_id: 42, .. }));
    }

    #[test]
    fn lookup_and_create_conversation_parses() {
        let line = r#"{"action":"lookup_and_create_conversation","tool_use_id":"tu1","name":"n"}"#;
        let req: ToolServerRequest = serde_json::from_str(line).unwrap();
        assert!(matches!(
            req,
            ToolServerRequest::LookupAndCreateConversation { .. }
        ));
    }

    #[test]
    fn unknown_action_response_carries_name() {
        let resp = ToolServerResponse::unknown_action("frobnicate");
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("frobnicate"));
    }

    #[test]
    fn invalid_json_response_matches_pinned_substring() {
        let resp = ToolServerResponse::invalid_json();
        assert!(resp.error.unwrap().to_lowercase().contains("json"));
    }
}
