//! The Worker (*Pylon* in source) process: the agent-side binary that
//! owns a Workspace/Message Store, drives `pylon_session::SessionManager`
//! against Beacon's TCP multiplexer, exposes the local Tool Server
//! (§6.3), and maintains an outbound link to Relay (§6.4) presenting
//! itself as a `pylon` device.
//!
//! Grounded on the teacher's `gateway::{main, bootstrap}` wiring and
//! `cli::pid` — see `DESIGN.md` for the full per-file ledger.

pub mod autorun;
pub mod beacon_link;
pub mod bootstrap;
pub mod relay_link;
pub mod tool_server;
