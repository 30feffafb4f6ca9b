//! Wire format and request/response correlation for the control WebSocket
//! (spec.md §4.2).
//!
//! Every frame is a JSON object `{"name": ..., "arguments": ..., "id": ...}`.
//! Outbound requests carry a locally-assigned `id`; the server echoes it back
//! verbatim on a response frame named literally `_response_`. The original
//! correlates these through an `AsyncMap` (a `dict` guarded by an
//! `asyncio.Condition`); this
//! reimplements the same rendezvous with a `oneshot` channel registered
//! before the request is sent, which is the idiomatic Rust shape for a
//! single-reply correlation table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// An outbound control-channel request.
#[derive(Debug, Serialize)]
pub struct Request {
    pub name: String,
    pub arguments: Value,
    pub id: u64,
}

/// Any frame received from the server, before dispatch.
#[derive(Debug, Deserialize)]
pub struct Frame {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub id: Option<u64>,
}

/// The literal frame name the server uses for a correlated response; the
/// request id that it answers travels in the frame's own `id` field, not in
/// the name (matches the original's `msg['name'] == '_response_'` check).
pub const RESPONSE_NAME: &str = "_response_";

/// Assigns request ids and routes response frames back to the caller that
/// is awaiting them.
pub struct ResponseRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl Default for ResponseRegistry {
    fn default() -> Self {
        Self {
            // Ids are allocated from this single counter for every outbound
            // message (requests and heartbeats alike) and must start at 1
            // (spec.md §4.2, I4).
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next request id, with no meaning beyond keeping the
    /// single outbound id sequence monotonic (used for fire-and-forget
    /// messages like a heartbeat, which registers no response slot).
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Reserve the next request id and register a slot for its response.
    pub fn register(&self) -> (u64, oneshot::Receiver<Value>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    /// Deliver a response frame's arguments to whoever registered `id`.
    /// Silently drops it if nobody is waiting (already timed out, or a
    /// duplicate).
    pub fn fulfill(&self, id: u64, arguments: Value) {
        if let Some(tx) = self.pending.lock().unwrap().remove(&id) {
            let _ = tx.send(arguments);
        }
    }

    /// Drop any registrations left over once the connection dies, so
    /// waiters observe a closed channel instead of hanging forever.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfill_delivers_to_registered_receiver() {
        let registry = ResponseRegistry::new();
        let (id, rx) = registry.register();
        registry.fulfill(id, serde_json::json!({"ok": true}));
        let value = rx.await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn fulfill_on_unknown_id_is_a_noop() {
        let registry = ResponseRegistry::new();
        registry.fulfill(999, serde_json::json!(null));
    }
}
