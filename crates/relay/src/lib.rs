//! Relay: the WebSocket hub federating Pylons and Apps (§4.6).
//!
//! Grounded on the teacher's `gateway::nodes` module — connection
//! registry, per-socket read/dispatch loop — generalized to Relay's
//! three-device-type auth state machine and routing rules instead of a
//! single node-to-gateway protocol.

pub mod auth;
pub mod registry;
pub mod routing;
pub mod state;
pub mod ws;

pub use auth::{GoogleIdTokenVerifier, GoogleTokenInfoVerifier};
pub use registry::{ClientRegistry, ConnectedClient};
pub use state::AppState;
