//! Structured trace envelope.
//!
//! A small tagged enum of "interesting things happened" events, emitted
//! through `tracing` so the fleet's JSON logs carry a stable `event` field
//! regardless of which binary (`beacon`/`relay`/`worker`) produced them.
//! This is the "packet logger" shared utility referenced in the system
//! overview: every registration, route, and session transition funnels
//! through [`emit`] rather than ad hoc `tracing::info!` call sites.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    PylonRegistered { pylon_id: u8, mcp_host: String, mcp_port: u16 },
    PylonUnregistered { pylon_id: u8 },
    ConnectionAdopted { pylon_id: u8 },
    DeviceAuthenticated { device_id: u8, device_type: String },
    DeviceDisconnected { device_id: u8, device_type: String },
    FrameRouted { from: u8, to: Option<u8>, broadcast: Option<String> },
    SessionStateChanged { conv_id: u32, state: String },
    PermissionRequested { conv_id: u32, tool_use_id: String, tool_name: String },
    PermissionResolved { conv_id: u32, tool_use_id: String, decision: String },
    ToolUseResolved { tool_use_id: String, conv_id: u32 },
    SessionStopped { conv_id: u32 },
}

/// Emit a [`TraceEvent`] at `info` level with its fields flattened into the
/// current span. Call sites should prefer this over raw `tracing::info!`
/// so every binary's structured logs share the same event vocabulary.
pub fn emit(event: TraceEvent) {
    match serde_json::to_value(&event) {
        Ok(value) => tracing::info!(target: "pylon::trace", event = %value),
        Err(e) => tracing::warn!(target: "pylon::trace", error = %e, "failed to serialize trace event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_tag_field() {
        let event = TraceEvent::PylonRegistered {
            pylon_id: 65,
            mcp_host: "127.0.0.1".into(),
            mcp_port: 9878,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "pylon_registered");
        assert_eq!(value["pylon_id"], 65);
    }
}
