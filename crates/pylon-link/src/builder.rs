//! Builder pattern for constructing a [`RelayLinkClient`].

use crate::client::RelayLinkClient;
use crate::reconnect::ReconnectBackoff;
use crate::types::LinkError;

/// Fluent builder for [`RelayLinkClient`].
///
/// ```rust,no_run
/// # use pylon_link::RelayLinkBuilder;
/// let client = RelayLinkBuilder::new()
///     .relay_url("ws://127.0.0.1:8787")
///     .device_type("pylon")
///     .device_index(1)
///     .build()
///     .unwrap();
/// ```
pub struct RelayLinkBuilder {
    relay_url: String,
    device_type: String,
    device_index: Option<u8>,
    id_token: Option<String>,
    share_id: Option<String>,
    reconnect_backoff: ReconnectBackoff,
}

impl RelayLinkBuilder {
    pub fn new() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8787".into(),
            device_type: "pylon".into(),
            device_index: None,
            id_token: None,
            share_id: None,
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    pub fn relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn device_index(mut self, index: u8) -> Self {
        self.device_index = Some(index);
        self
    }

    pub fn id_token(mut self, token: impl Into<String>) -> Self {
        self.id_token = Some(token.into());
        self
    }

    pub fn share_id(mut self, share_id: impl Into<String>) -> Self {
        self.share_id = Some(share_id.into());
        self
    }

    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<RelayLinkClient, LinkError> {
        if self.relay_url.is_empty() {
            return Err(LinkError::Config("relay_url is required".into()));
        }
        Ok(RelayLinkClient {
            relay_url: self.relay_url,
            device_type: self.device_type,
            device_index: self.device_index,
            id_token: self.id_token,
            share_id: self.share_id,
            reconnect_backoff: self.reconnect_backoff,
        })
    }
}

impl Default for RelayLinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_relay_url() {
        let result = RelayLinkBuilder::new().relay_url("").build();
        assert!(result.is_err());
    }

    #[test]
    fn build_defaults_device_type_to_pylon() {
        let client = RelayLinkBuilder::new().build().unwrap();
        assert_eq!(client.device_type, "pylon");
    }
}
