//! Wire protocols for the three network services: Beacon (TCP), Relay
//! (WebSocket), and the Worker's local tool server (TCP). Every protocol
//! is JSON with a tagged-variant discriminator; unknown discriminants are
//! recoverable parse errors, never panics (§9).

pub mod beacon;
pub mod relay;
pub mod toolserver;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Distinguishes the two failure modes §7 pins separate error text for:
/// a line that isn't JSON at all, vs. JSON whose `tag_field` doesn't match
/// any known action/type.
pub enum ParsedRequest<T> {
    Ok(T),
    UnknownAction(String),
    InvalidJson,
}

/// Parses one newline-delimited-JSON request line against a `#[serde(tag =
/// "...")]` enum, reporting an unmatched tag value as `UnknownAction`
/// rather than folding it into `InvalidJson` — both `beacon::connection`
/// and `worker::tool_server` dispatch through this so the two response
/// texts (`"Invalid JSON format"` vs. `"Unknown action: ..."`) never drift.
pub fn parse_tagged_request<T: DeserializeOwned>(line: &str, tag_field: &str) -> ParsedRequest<T> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return ParsedRequest::InvalidJson,
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(req) => ParsedRequest::Ok(req),
        Err(_) => {
            let tag = value
                .get(tag_field)
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            ParsedRequest::UnknownAction(tag)
        }
    }
}
