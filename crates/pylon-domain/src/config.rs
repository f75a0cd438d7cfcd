//! Process configuration, layered env-vars-then-file the way every binary
//! in this workspace loads settings: defaults baked into each field via
//! `#[serde(default = "...")]`, overridable by a TOML file, overridable
//! again by the environment variables named in §6.6.

use serde::{Deserialize, Serialize};

// ── Beacon ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default = "d_beacon_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Default per-request timeout before Beacon gives up waiting on the
    /// SDK adapter for a one-shot action.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            port: d_beacon_port(),
            host: d_host(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

fn d_beacon_port() -> u16 {
    9875
}

// ── Relay ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "d_relay_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Message `type`s a `viewer` device may send (§9 open question:
    /// viewer allow-list extensibility).
    #[serde(default = "d_viewer_allowed_types")]
    pub viewer_allowed_types: Vec<String>,
    /// `deviceIndex -> allowed IPs` for `pylon` auth.
    #[serde(default)]
    pub pylon_ip_allowlist: std::collections::HashMap<u8, Vec<String>>,
    /// Email allow-list checked after Google OAuth verification. Empty
    /// means OAuth is not configured and apps are admitted without a
    /// token.
    #[serde(default)]
    pub oauth_email_allowlist: Vec<String>,
    /// Environment tag (§3) used when encoding the 7-bit `deviceId` this
    /// Relay hands out to newly authenticated app/viewer/pylon clients.
    #[serde(default = "d_env")]
    pub env: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: d_relay_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            viewer_allowed_types: d_viewer_allowed_types(),
            pylon_ip_allowlist: Default::default(),
            oauth_email_allowlist: Vec::new(),
            env: d_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_relay_port() -> u16 {
    8787
}

fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

fn d_viewer_allowed_types() -> Vec<String> {
    vec!["share_history".into()]
}

// ── Worker ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "d_relay_url")]
    pub relay_url: String,
    #[serde(default = "d_beacon_host")]
    pub beacon_host: String,
    #[serde(default = "d_beacon_port")]
    pub beacon_port: u16,
    #[serde(default = "d_tool_server_port")]
    pub tool_server_port: u16,
    #[serde(default = "d_env")]
    pub env: String,
    #[serde(default = "d_device_index")]
    pub device_index: u8,
    #[serde(default = "d_claude_config_dir")]
    pub claude_config_dir: String,
    #[serde(default = "d_max_messages_per_session")]
    pub max_messages_per_session: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            relay_url: d_relay_url(),
            beacon_host: d_beacon_host(),
            beacon_port: d_beacon_port(),
            tool_server_port: d_tool_server_port(),
            env: d_env(),
            device_index: d_device_index(),
            claude_config_dir: d_claude_config_dir(),
            max_messages_per_session: d_max_messages_per_session(),
        }
    }
}

fn d_relay_url() -> String {
    "ws://127.0.0.1:8787".into()
}

fn d_beacon_host() -> String {
    "127.0.0.1".into()
}

fn d_tool_server_port() -> u16 {
    9879
}

fn d_env() -> String {
    "dev".into()
}

fn d_device_index() -> u8 {
    1
}

fn d_claude_config_dir() -> String {
    "~/.config/pylon".into()
}

/// The bound named in §4.3 / the resolved Open Question in DESIGN.md:
/// enforced on every `append`, never exceeded even transiently.
fn d_max_messages_per_session() -> usize {
    200
}

// ── shared ───────────────────────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_request_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_config_defaults_match_spec() {
        let cfg = BeaconConfig::default();
        assert_eq!(cfg.port, 9875);
    }

    #[test]
    fn relay_config_defaults_allow_share_history_only() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.viewer_allowed_types, vec!["share_history"]);
    }

    #[test]
    fn worker_config_round_trips_through_toml() {
        let cfg = WorkerConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: WorkerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.beacon_port, cfg.beacon_port);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let parsed: BeaconConfig = toml::from_str("host = \"0.0.0.0\"").unwrap();
        assert_eq!(parsed.port, 9875);
        assert_eq!(parsed.host, "0.0.0.0");
    }
}
