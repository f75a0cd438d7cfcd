//! Shared error type for the reconnecting transport clients in this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("config: {0}")]
    Config(String),
    #[error("websocket: {0}")]
    WebSocket(String),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
