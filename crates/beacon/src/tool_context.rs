//! `toolUseId -> ToolContext` (§4.5): created lazily the moment a
//! `tool_use` content block is observed on the SDK stream, and never
//! evicted for the lifetime of the Beacon process — the matching MCP
//! callback may arrive long after the turn that produced the tool use
//! has ended.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use pylon_domain::entities::ToolContext;
use pylon_domain::id::ConvId;

#[derive(Default)]
pub struct ToolContextRegistry {
    entries: RwLock<HashMap<String, ToolContext>>,
}

impl ToolContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool_use_id: String, conv_id: ConvId, raw_tool_use: Value) {
        self.entries.write().insert(tool_use_id, ToolContext { conv_id, raw_tool_use });
    }

    pub fn get(&self, tool_use_id: &str) -> Option<ToolContext> {
        self.entries.read().get(tool_use_id).cloned()
    }
}

/// Scans a raw SDK `stream_event` payload for a `content_block_start` of
/// type `tool_use`, extracting `(toolUseId, toolName, input)`. Returns
/// `None` for every other stream event shape.
pub fn extract_tool_use_from_stream_event(data: &Value) -> Option<(String, String, Value)> {
    let block = data.get("content_block")?;
    if block.get("type")?.as_str()? != "tool_use" {
        return None;
    }
    let id = block.get("id")?.as_str()?.to_string();
    let name = block.get("name")?.as_str()?.to_string();
    let input = block.get("input").cloned().unwrap_or(Value::Null);
    Some((id, name, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_domain::id::{encode_conversation, encode_pylon, encode_workspace, Env};
    use serde_json::json;

    #[test]
    fn extracts_tool_use_from_content_block_start() {
        let data = json!({
            "content_block": {"type": "tool_use", "id": "tu1", "name": "Bash", "input": {"command": "ls"}}
        });
        let (id, name, input) = extract_tool_use_from_stream_event(&data).unwrap();
        assert_eq!(id, "tu1");
        assert_eq!(name, "Bash");
        assert_eq!(input["command"], "ls");
    }

    #[test]
    fn ignores_non_tool_use_content_blocks() {
        let data = json!({"content_block": {"type": "text"}});
        assert!(extract_tool_use_from_stream_event(&data).is_none());
    }

    #[test]
    fn lookup_round_trips_after_record() {
        let registry = ToolContextRegistry::new();
        let pylon = encode_pylon(Env::Dev, 1).unwrap();
        let ws = encode_workspace(pylon, 1).unwrap();
        let conv = encode_conversation(ws, 1).unwrap();
        registry.record("tu1".into(), conv, json!({"id": "tu1"}));
        let ctx = registry.get("tu1").unwrap();
        assert_eq!(ctx.conv_id, conv);
    }
}
