//! The narrow LLM SDK interface consumed (not defined) by the Session
//! Manager and Beacon (§6.1). Expressed as a Rust trait object so a test
//! double can replay a canned message sequence without a real SDK
//! process — production crates depend only on [`LlmAdapter`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pylon_domain::error::Result;

use crate::state::CancelHandle;

/// One observed tool-use request the adapter is asking permission for.
#[derive(Debug, Clone)]
pub struct CanUseToolRequest {
    pub tool_name: String,
    pub input: Value,
    /// The SDK's own internal id for this tool call. Not the id surfaced
    /// to external callers — see `permission::generate_tool_use_id`.
    pub tool_use_id: String,
}

#[derive(Debug, Clone)]
pub enum CanUseToolResult {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
}

/// The `canUseTool` callback injected into a `query`.
#[async_trait]
pub trait CanUseTool: Send + Sync {
    async fn can_use_tool(&self, request: CanUseToolRequest) -> CanUseToolResult;
}

#[derive(Clone)]
pub struct QueryOptions {
    pub prompt: String,
    pub cwd: String,
    pub abort: CancelHandle,
    pub conversation_id: Option<u32>,
    pub include_partial_messages: bool,
    pub setting_sources: Vec<String>,
    pub resume: Option<String>,
    pub mcp_servers: Option<HashMap<String, Value>>,
    pub env: Option<HashMap<String, String>>,
    pub can_use_tool: Option<std::sync::Arc<dyn CanUseTool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSubtype {
    Init,
    Status,
    CompactBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub is_error: bool,
    pub content: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub content: Vec<ToolResultBlock>,
}

/// A tagged message shape the adapter's `query` stream produces, mirroring
/// §6.1's observed message shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SdkMessage {
    System {
        subtype: SystemSubtype,
        session_id: Option<String>,
        model: Option<String>,
        tools: Option<Vec<String>>,
        status: Option<String>,
        compact_metadata: Option<Value>,
    },
    Assistant {
        message: AssistantMessage,
        parent_tool_use_id: Option<String>,
    },
    User {
        message: UserMessage,
        parent_tool_use_id: Option<String>,
    },
    StreamEvent {
        event: StreamEventKind,
        data: Value,
    },
    ToolProgress {
        tool_name: String,
        elapsed_time_seconds: f64,
    },
    Result {
        subtype: String,
        total_cost_usd: Option<f64>,
        num_turns: Option<u32>,
        usage: Option<UsageInfo>,
    },
}

/// The adapter boundary: Beacon and the Session Manager depend only on
/// this trait object, never on a concrete provider.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn query(&self, options: QueryOptions) -> Result<BoxStream<'static, SdkMessage>>;
}
