//! Beacon: the single-process TCP multiplexer owning one LLM SDK
//! instance on behalf of every Pylon worker in its environment (§4.5).
//!
//! Grounded on the teacher's `gateway::nodes` module — a registry of
//! connected peers plus a per-socket read/dispatch loop — generalized
//! around Beacon's own request shapes instead of tool-routing frames.

pub mod adapter;
pub mod connection;
pub mod registry;
pub mod tool_context;

pub use adapter::ProcessLlmAdapter;
pub use connection::{BeaconCanUseTool, BeaconServer, PermissionResolution};
pub use registry::{ActiveConnections, PylonRegistry};
pub use tool_context::{extract_tool_use_from_stream_event, ToolContextRegistry};
