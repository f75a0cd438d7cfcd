//! Frame routing rules (§4.6): who an authenticated sender's message is
//! delivered to, given its `to`/`broadcast` fields and its own device
//! type's type-default fan-out.

use tokio::sync::mpsc;
use serde_json::Value;

use pylon_domain::entities::DeviceType;
use pylon_protocol::relay::InboundFrame;

use crate::registry::ClientRegistry;

/// Resolve the sinks a routed frame should be delivered to. Returns an
/// empty vec both for "no matching recipients" and for "viewer sent a
/// disallowed type" — both are silent drops per §4.6.
pub fn resolve_targets(
    frame: &InboundFrame,
    sender_type: DeviceType,
    viewer_allowed_types: &[String],
    registry: &ClientRegistry,
) -> Vec<mpsc::Sender<Value>> {
    if sender_type == DeviceType::Viewer && !viewer_allowed_types.iter().any(|t| t == &frame.kind) {
        return Vec::new();
    }

    if let Some(device_id) = frame.to {
        return registry.sinks_for_device(device_id);
    }

    if let Some(broadcast) = &frame.broadcast {
        return match broadcast.as_str() {
            "app" => registry.sinks_for_type(DeviceType::App),
            "pylon" => registry.sinks_for_type(DeviceType::Pylon),
            _ => Vec::new(),
        };
    }

    match sender_type {
        DeviceType::Pylon => registry.sinks_for_type(DeviceType::App),
        DeviceType::App => registry.sinks_for_type(DeviceType::Pylon),
        DeviceType::Viewer => registry.sinks_for_type(DeviceType::Pylon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectedClient;
    use pylon_domain::entities::RelayClient;
    use pylon_domain::id::{encode_client, encode_pylon, Env};

    fn insert(registry: &ClientRegistry, device_type: DeviceType, idx: u8) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(4);
        let (pylon_id, client_id) = match device_type {
            DeviceType::Pylon => (Some(encode_pylon(Env::Dev, idx.max(1)).unwrap()), None),
            _ => (None, Some(encode_client(Env::Dev, idx).unwrap())),
        };
        registry.insert(ConnectedClient {
            connection_id: idx as u64,
            client: RelayClient {
                ip: "127.0.0.1".into(),
                device_index: idx,
                device_type,
                authenticated: true,
                share_id: None,
                email: None,
            },
            pylon_id,
            client_id,
            sink: tx,
        });
        rx
    }

    fn frame(kind: &str, to: Option<u8>, broadcast: Option<&str>) -> InboundFrame {
        serde_json::from_value(serde_json::json!({
            "type": kind,
            "to": to,
            "broadcast": broadcast,
        }))
        .unwrap()
    }

    #[test]
    fn viewer_disallowed_type_is_dropped() {
        let registry = ClientRegistry::new();
        let _rx = insert(&registry, DeviceType::Pylon, 1);
        let frame = frame("chat", None, None);
        let targets = resolve_targets(&frame, DeviceType::Viewer, &["share_history".to_string()], &registry);
        assert!(targets.is_empty());
    }

    #[test]
    fn viewer_allowed_type_reaches_pylons() {
        let registry = ClientRegistry::new();
        let _rx = insert(&registry, DeviceType::Pylon, 1);
        let frame = frame("share_history", None, None);
        let targets = resolve_targets(&frame, DeviceType::Viewer, &["share_history".to_string()], &registry);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn type_default_pylon_reaches_apps_only() {
        let registry = ClientRegistry::new();
        let _rx_pylon = insert(&registry, DeviceType::Pylon, 1);
        let _rx_app = insert(&registry, DeviceType::App, 0);
        let frame = frame("status", None, None);
        let targets = resolve_targets(&frame, DeviceType::Pylon, &[], &registry);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn to_addressed_frame_reaches_only_matching_device() {
        let registry = ClientRegistry::new();
        let _rx_a = insert(&registry, DeviceType::App, 0);
        let _rx_b = insert(&registry, DeviceType::App, 1);
        let target_id = encode_client(Env::Dev, 1).unwrap().raw();
        let frame = frame("chat", Some(target_id), None);
        let targets = resolve_targets(&frame, DeviceType::App, &[], &registry);
        assert_eq!(targets.len(), 1);
    }
}
