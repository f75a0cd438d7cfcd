//! Beacon wire protocol (§6.2): TCP, newline-delimited JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One incoming line on Beacon's socket, dispatched on the `action` tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BeaconRequest {
    Register {
        pylon_id: u8,
        mcp_host: String,
        mcp_port: u16,
        env: String,
        #[serde(default)]
        force: bool,
    },
    Unregister {
        pylon_id: u8,
    },
    Query {
        conv_id: u32,
        options: Value,
    },
    PermissionResponse {
        tool_use_id: String,
        behavior: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        updated_input: Option<Value>,
    },
    Lookup {
        tool_use_id: String,
    },
    Ping,
}

/// The `{success, error?}` shape shared by every one-shot response, with
/// `lookup`'s extra fields folded in (omitted via `skip_serializing_if`
/// for every other action).
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OneShotResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conv_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl OneShotResult {
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

    pub fn lookup_ok(conv_id: u32, mcp_host: String, mcp_port: u16, raw: Value) -> Self {
        Self {
            success: true,
            conv_id: Some(conv_id),
            mcp_host: Some(mcp_host),
            mcp_port: Some(mcp_port),
            raw: Some(raw),
            ..Default::default()
        }
    }
}

/// Streamed / asynchronous frames, tagged on `type`. Unlike one-shots,
/// these carry `conversationId` (not `convId`) per the spec's wire text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeaconFrame {
    Event {
        conversation_id: u32,
        message: Value,
    },
    Error {
        conversation_id: u32,
        error: String,
    },
    PermissionRequest {
        conversation_id: u32,
        tool_name: String,
        input: Value,
        tool_use_id: String,
    },
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_parses_from_action_tag() {
        let line = r#"{"action":"register","pylon_id":65,"mcp_host":"127.0.0.1","mcp_port":9878,"env":"dev"}"#;
        let req: BeaconRequest = serde_json::from_str(line).unwrap();
        match req {
            BeaconRequest::Register { pylon_id, mcp_port, force, .. } => {
                assert_eq!(pylon_id, 65);
                assert_eq!(mcp_port, 9878);
                assert!(!force);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let line = r#"{"action":"frobnicate"}"#;
        let result: Result<BeaconRequest, _> = serde_json::from_str(line);
        assert!(result.is_err());
    }

    #[test]
    fn lookup_ok_uses_conv_id_not_conversation_id() {
        let resp = OneShotResult::lookup_ok(42, "127.0.0.1".into(), 9878, Value::Null);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["convId"], 42);
        assert!(value.get("conversationId").is_none());
    }

    #[test]
    fn event_frame_uses_conversation_id() {
        let frame = BeaconFrame::Event {
            conversation_id: 42,
            message: Value::Null,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["conversationId"], 42);
    }

    #[test]
    fn pong_frame_has_no_extra_fields() {
        let frame = BeaconFrame::Pong;
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "pong");
    }
}
