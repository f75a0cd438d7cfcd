//! The Session Manager's event stream (§4.4): emitted to a single injected
//! consumer via [`SessionEventSink`]. Wire tags follow the specification's
//! event table verbatim (mixed casing is intentional, not an oversight —
//! `permission_request`/`usage_update` are snake_case, the rest camelCase).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pylon_domain::entities::ConversationStatus;
use pylon_domain::id::ConvId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename = "init")]
    Init {
        sdk_session_id: String,
        model: String,
        tools: Vec<String>,
    },
    #[serde(rename = "stateUpdate")]
    StateUpdate { state: String },
    #[serde(rename = "text")]
    Text { delta: String },
    #[serde(rename = "textComplete")]
    TextComplete { text: String },
    #[serde(rename = "toolInfo")]
    ToolInfo {
        tool_use_id: String,
        tool_name: String,
        input: Value,
        parent_tool_use_id: Option<String>,
    },
    #[serde(rename = "toolProgress")]
    ToolProgress {
        tool_use_id: Option<String>,
        tool_name: String,
        elapsed_time_seconds: f64,
    },
    #[serde(rename = "toolComplete")]
    ToolComplete {
        tool_use_id: String,
        tool_name: String,
        success: bool,
        output: Option<String>,
        error: Option<String>,
    },
    #[serde(rename = "askQuestion")]
    AskQuestion { tool_use_id: String, input: Value },
    #[serde(rename = "permission_request")]
    PermissionRequest {
        tool_use_id: String,
        tool_name: String,
        input: Value,
    },
    #[serde(rename = "usage_update")]
    UsageUpdate { input_tokens: u64, output_tokens: u64 },
    #[serde(rename = "compactStart")]
    CompactStart,
    #[serde(rename = "compactComplete")]
    CompactComplete,
    #[serde(rename = "result")]
    Result {
        duration_ms: u64,
        success: bool,
        input_tokens: u64,
        output_tokens: u64,
    },
    #[serde(rename = "claudeAborted")]
    ClaudeAborted { reason: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "state")]
    State { status: ConversationStatus },
}

/// The single consumer a `SessionManager` publishes its event stream to.
/// An axum/WebSocket layer implements this to fan events out to Relay; a
/// test double can simply collect them into a `Vec`.
pub trait SessionEventSink: Send + Sync {
    fn emit(&self, conv_id: ConvId, event: SessionEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_request_tag_is_snake_case() {
        let event = SessionEvent::PermissionRequest {
            tool_use_id: "perm_1_abc".into(),
            tool_name: "Bash".into(),
            input: serde_json::json!({}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "permission_request");
        assert_eq!(value["toolUseId"], "perm_1_abc");
    }

    #[test]
    fn tool_info_tag_is_camel_case() {
        let event = SessionEvent::ToolInfo {
            tool_use_id: "t1".into(),
            tool_name: "Read".into(),
            input: serde_json::json!({}),
            parent_tool_use_id: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "toolInfo");
    }
}
