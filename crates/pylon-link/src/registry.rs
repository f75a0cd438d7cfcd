//! Generic pending-resolver registry (§9 design note: "Pending-resolver
//! map"). Beacon's `pendingPermissions`, the Session Manager's permission
//! and question waiters, and a TCP client's in-flight request table are
//! all the same shape: a key minted by the caller, resolved exactly once
//! by whichever side observes the matching response, with a drain path
//! for shutdown so no waiter is ever dropped silently.
//!
//! Lock discipline: the map lock is only ever held for the HashMap
//! operation itself, never across an `.await` — callers resolve by
//! sending into a `oneshot::Sender` they already own, not by awaiting
//! under the lock.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A map of in-flight requests keyed by `K`, each resolved at most once
/// with a `V`.
pub struct PendingRegistry<K, V> {
    pending: Mutex<HashMap<K, oneshot::Sender<V>>>,
}

impl<K, V> Default for PendingRegistry<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> PendingRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` and return the receiver half; the caller awaits it
    /// at its next suspension point.
    pub fn register(&self, key: K) -> oneshot::Receiver<V> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(key, tx);
        rx
    }

    /// Resolve a pending entry. Returns `true` if a waiter was found;
    /// unknown keys are silently ignored (per §7, unknown ids never
    /// close the socket or panic).
    pub fn resolve(&self, key: &K, value: V) -> bool {
        if let Some(tx) = self.pending.lock().remove(key) {
            let _ = tx.send(value);
            true
        } else {
            false
        }
    }

    pub fn cancel(&self, key: &K) {
        self.pending.lock().remove(key);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drain every pending entry, resolving each with `make_value(key)`.
    /// Used on session `stop()` / shutdown so no resolver outlives its
    /// owner (§7: permission resolvers outliving their session resolve
    /// with `Cancelled`; `stop()` resolves them with `deny("Stopped")`).
    pub fn drain_with(&self, mut make_value: impl FnMut(&K) -> V) -> Vec<K> {
        let mut pending = self.pending.lock();
        let entries: Vec<(K, oneshot::Sender<V>)> = pending.drain().collect();
        drop(pending);
        let mut keys = Vec::with_capacity(entries.len());
        for (key, tx) in entries {
            let value = make_value(&key);
            let _ = tx.send(value);
            keys.push(key);
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_value_to_waiter() {
        let reg: PendingRegistry<String, i32> = PendingRegistry::new();
        let rx = reg.register("a".to_string());
        assert!(reg.resolve(&"a".to_string(), 42));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn resolve_unknown_key_is_noop() {
        let reg: PendingRegistry<String, i32> = PendingRegistry::new();
        assert!(!reg.resolve(&"missing".to_string(), 1));
    }

    #[tokio::test]
    async fn drain_with_resolves_every_entry() {
        let reg: PendingRegistry<String, &'static str> = PendingRegistry::new();
        let rx_a = reg.register("a".to_string());
        let rx_b = reg.register("b".to_string());

        let mut drained = reg.drain_with(|_| "Stopped");
        drained.sort();
        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rx_a.await.unwrap(), "Stopped");
        assert_eq!(rx_b.await.unwrap(), "Stopped");
        assert!(reg.is_empty());
    }

    #[test]
    fn cancel_removes_without_resolving() {
        let reg: PendingRegistry<String, i32> = PendingRegistry::new();
        let _rx = reg.register("a".to_string());
        reg.cancel(&"a".to_string());
        assert!(!reg.contains(&"a".to_string()));
    }
}
