//! Relay wire protocol (§6.4): WebSocket, JSON text frames.
//!
//! Inbound frames are parsed into one generic envelope (mirroring the
//! wire shape `{type, payload, to?, broadcast?, from?}` plus `auth`'s own
//! top-level fields) rather than a single discriminated enum, because
//! forward-routed frames carry an open-ended, app-defined `type` that the
//! core never needs to understand — only `auth`/`get_devices`/`ping` are
//! interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every inbound frame, parsed once. `kind` decides whether the relay
/// handles it internally (`auth`, `get_devices`, `ping`) or routes it.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub to: Option<u8>,
    #[serde(default)]
    pub broadcast: Option<String>,
    #[serde(default)]
    pub from: Option<u8>,

    // `auth` frame fields — present only when `kind == "auth"`.
    #[serde(default, rename = "deviceType")]
    pub device_type: Option<String>,
    #[serde(default, rename = "deviceId")]
    pub device_id: Option<u8>,
    #[serde(default, rename = "idToken")]
    pub id_token: Option<String>,
    #[serde(default, rename = "shareId")]
    pub share_id: Option<String>,
}

pub const KIND_AUTH: &str = "auth";
pub const KIND_GET_DEVICES: &str = "get_devices";
pub const KIND_GET_DEVICES_CAMEL: &str = "getDevices";
pub const KIND_PING: &str = "ping";

impl InboundFrame {
    /// Internal control types are handled by the hub itself and never
    /// routed to other devices.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind.as_str(),
            KIND_AUTH | KIND_GET_DEVICES | KIND_GET_DEVICES_CAMEL | KIND_PING
        )
    }
}

/// A device entry as reported in `device_list`/`device_status`/
/// `auth_result`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// The 7-bit encoded device id (§6.5).
    pub device_id: u8,
    pub device_index: u8,
    pub device_type: String,
}

/// Server→client control frames. Forward-routed frames are constructed
/// separately by `forward_frame` because their `type` is application
/// defined.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Connected,
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<DeviceInfo>,
    },
    DeviceList {
        devices: Vec<DeviceInfo>,
    },
    DeviceStatus {
        devices: Vec<DeviceInfo>,
    },
    ClientDisconnect {
        device_index: u8,
        device_type: String,
    },
    Pong,
    Error {
        error: String,
    },
}

/// Re-frame a routed message for delivery: the `type` is whatever the
/// sender used, `from` is always overwritten with the sender's identity.
pub fn forward_frame(original_type: &str, payload: Value, from: u8) -> Value {
    serde_json::json!({
        "type": original_type,
        "payload": payload,
        "from": from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_parses_top_level_fields() {
        let line = r#"{"type":"auth","deviceType":"pylon","deviceId":1}"#;
        let frame: InboundFrame = serde_json::from_str(line).unwrap();
        assert_eq!(frame.kind, "auth");
        assert_eq!(frame.device_type.as_deref(), Some("pylon"));
        assert!(frame.is_internal());
    }

    #[test]
    fn arbitrary_routed_type_parses_without_error() {
        let line = r#"{"type":"chat","payload":{"text":"hi"},"to":5}"#;
        let frame: InboundFrame = serde_json::from_str(line).unwrap();
        assert_eq!(frame.kind, "chat");
        assert_eq!(frame.to, Some(5));
        assert!(!frame.is_internal());
    }

    #[test]
    fn forward_frame_injects_from() {
        let value = forward_frame("chat", serde_json::json!({"text": "hi"}), 65);
        assert_eq!(value["from"], 65);
        assert_eq!(value["type"], "chat");
    }
}
