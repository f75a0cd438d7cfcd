//! Reconnecting transport scaffolding shared by the `worker` binary: a
//! WebSocket client for the Worker's outbound link to Relay (§6.4), a
//! jittered exponential backoff policy, and a generic pending-resolver
//! registry used anywhere a request is resolved asynchronously by its
//! counterpart (Beacon's permission round-trips, the Session Manager's
//! permission/question waiters).

pub mod builder;
pub mod client;
pub mod reconnect;
pub mod registry;
pub mod types;

pub use builder::RelayLinkBuilder;
pub use client::RelayLinkClient;
pub use reconnect::ReconnectBackoff;
pub use registry::PendingRegistry;
pub use types::LinkError;
