//! Stream port (§4.1): `publish` (persistent, groupable), `ephemeral`
//! (live-only), `subscribe` (cancellable iterator). The in-memory
//! implementation is a thin wrapper over `tokio::sync::broadcast`, the same
//! primitive the teacher gateway already uses for its SSE log fan-out.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// An event published to a topic.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamEvent {
    pub topic: String,
    pub group_id: Option<String>,
    pub payload: Value,
}

/// A cancellable subscription: drop it to stop receiving.
pub struct Subscription {
    inner: BroadcastStream<StreamEvent>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            match self.inner.next().await {
                Some(Ok(event)) => return Some(event),
                // A lagged receiver skips to the next live event rather than erroring out.
                Some(Err(_lagged)) => continue,
                None => return None,
            }
        }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Topic-based pub/sub port. `publish` and `ephemeral` are distinguished at
/// the port boundary only by intent (durable-group vs live-only); the
/// in-memory implementation backs both with the same broadcast channel since
/// there is no real persistence layer to distinguish group offsets here.
pub trait EventStream: Send + Sync {
    fn publish(&self, topic: &str, group_id: Option<&str>, payload: Value);
    fn ephemeral(&self, topic: &str, channel: Option<&str>, payload: Value);
    fn subscribe(&self, topic: &str) -> Subscription;
}

/// `tokio::sync::broadcast`-backed implementation, one channel per topic,
/// lazily created on first publish or subscribe.
pub struct InMemoryEventStream {
    topics: Mutex<HashMap<String, broadcast::Sender<StreamEvent>>>,
}

impl Default for InMemoryEventStream {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<StreamEvent> {
        let mut topics = self.topics.lock().expect("stream topic map poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl EventStream for InMemoryEventStream {
    fn publish(&self, topic: &str, group_id: Option<&str>, payload: Value) {
        let sender = self.sender_for(topic);
        let _ = sender.send(StreamEvent {
            topic: topic.to_string(),
            group_id: group_id.map(str::to_string),
            payload,
        });
    }

    fn ephemeral(&self, topic: &str, channel: Option<&str>, payload: Value) {
        let sender = self.sender_for(topic);
        let _ = sender.send(StreamEvent {
            topic: topic.to_string(),
            group_id: channel.map(str::to_string),
            payload,
        });
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        let sender = self.sender_for(topic);
        Subscription {
            inner: BroadcastStream::new(sender.subscribe()),
        }
    }
}
