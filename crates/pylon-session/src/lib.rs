//! The Session Manager (§4.4): one object per Worker process, driving at
//! most one in-flight LLM turn per `convId` and publishing a single
//! ordered event stream per conversation to an injected sink.
//!
//! Grounded on the teacher's `gateway::runtime` module (`turn`, `cancel`,
//! `approval`, `session_lock`), generalized around [`pylon_link`]'s
//! pending-resolver registry instead of a bespoke approval store.

pub mod adapter;
pub mod events;
pub mod manager;
pub mod permission;
pub mod state;

pub use adapter::{
    AssistantMessage, CanUseTool, CanUseToolRequest, CanUseToolResult, ContentBlock, LlmAdapter,
    QueryOptions, SdkMessage, StreamEventKind, SystemSubtype, ToolResultBlock, UsageInfo,
    UserMessage,
};
pub use events::{SessionEvent, SessionEventSink};
pub use manager::{SendMessageOptions, SessionManager};
pub use permission::{generate_tool_use_id, DefaultPermissionPolicy, PermissionPolicy, PermissionVerdict};
pub use state::{CancelHandle, SessionRuntime, TurnState, UsageTotals};
