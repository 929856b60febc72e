//! Lifecycle event bus for the function hub.
//!
//! Components publish small JSON envelopes when something observable happens
//! (a function is registered, an invocation is denied, the cache sweeps).
//! Delivery is lossy broadcast: slow or absent subscribers never block a
//! publisher. Topic constants live here so publishers and subscribers cannot
//! drift; keep them dot.case and alphabetized within sections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

// Invocation lifecycle
pub const TOPIC_INVOKE_COMPLETED: &str = "invoke.completed";
pub const TOPIC_INVOKE_DENIED: &str = "invoke.denied";
pub const TOPIC_INVOKE_FAILED: &str = "invoke.failed";

// Registry
pub const TOPIC_FUNCTION_REGISTERED: &str = "function.registered";

// Persistence
pub const TOPIC_CACHE_SWEPT: &str = "cache.swept";
pub const TOPIC_STORE_WRITE_FAILED: &str = "store.write.failed";

/// One published event (RFC3339 time, dot.case kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    /// Correlation id of the invocation that caused this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<String>,
    pub payload: Value,
}

/// Broadcast bus for hub lifecycle events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event. Serialization failures degrade to an error marker
    /// rather than failing the caller; publishing never blocks.
    pub fn publish<T: Serialize>(&self, kind: &str, corr_id: Option<&str>, payload: &T) {
        let val = serde_json::to_value(payload)
            .unwrap_or_else(|_| serde_json::json!({ "_ser": "error" }));
        let _ = self.tx.send(Envelope {
            time: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            kind: kind.to_string(),
            corr_id: corr_id.map(|s| s.to_string()),
            payload: val,
        });
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_envelope_with_corr_id() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(TOPIC_INVOKE_DENIED, Some("req-1"), &json!({"function": "echo"}));
        let env = rx.recv().await.unwrap();
        assert_eq!(env.kind, TOPIC_INVOKE_DENIED);
        assert_eq!(env.corr_id.as_deref(), Some("req-1"));
        assert_eq!(env.payload["function"], "echo");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = Bus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(TOPIC_CACHE_SWEPT, None, &json!({"evicted": 3}));
    }
}
