//! Message bus trait and the in-memory implementation.
//!
//! Pull semantics mirror a visibility-timeout queue: `poll` takes a message
//! in-flight, `ack` completes it, `nack` returns it for redelivery. The
//! in-memory bus backs tests and single-process deployments.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg_id: i64,
    pub payload: Value,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a JSON payload to a topic, returning the message id.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<i64>;

    /// Take the next message in-flight, if any.
    async fn poll(&self, topic: &str) -> Result<Option<QueuedMessage>>;

    /// Complete an in-flight message.
    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()>;

    /// Return an in-flight message to the topic for redelivery.
    async fn nack(&self, topic: &str, msg_id: i64) -> Result<()>;

    /// Messages pending or in-flight on a topic. Best effort; backends
    /// without cheap counts may return 0.
    async fn depth(&self, topic: &str) -> Result<usize>;
}

/// Publish an event envelope to a topic.
pub async fn publish_envelope(
    bus: &dyn MessageBus,
    topic: &str,
    envelope: &crate::events::EventEnvelope,
) -> Result<i64> {
    let payload = envelope.to_json()?;
    bus.publish(topic, &payload).await
}

#[derive(Default)]
struct TopicQueue {
    ready: VecDeque<QueuedMessage>,
    inflight: HashMap<i64, Value>,
}

/// Mutex-guarded per-topic queues. At-least-once semantics hold: a message
/// polled but never acked stays in-flight and can be nacked back.
#[derive(Default)]
pub struct InMemoryBus {
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, TopicQueue>,
    next_id: i64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let msg_id = inner.next_id;
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .ready
            .push_back(QueuedMessage {
                msg_id,
                payload: payload.clone(),
            });
        Ok(msg_id)
    }

    async fn poll(&self, topic: &str) -> Result<Option<QueuedMessage>> {
        let mut inner = self.inner.lock();
        let queue = match inner.topics.get_mut(topic) {
            Some(q) => q,
            None => return Ok(None),
        };
        match queue.ready.pop_front() {
            Some(msg) => {
                queue.inflight.insert(msg.msg_id, msg.payload.clone());
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.topics.get_mut(topic) {
            queue.inflight.remove(&msg_id);
        }
        Ok(())
    }

    async fn nack(&self, topic: &str, msg_id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        let queue = inner
            .topics
            .get_mut(topic)
            .ok_or_else(|| CoreError::Messaging(format!("unknown topic '{topic}'")))?;
        if let Some(payload) = queue.inflight.remove(&msg_id) {
            queue.ready.push_back(QueuedMessage { msg_id, payload });
        }
        Ok(())
    }

    async fn depth(&self, topic: &str) -> Result<usize> {
        let inner = self.inner.lock();
        Ok(inner
            .topics
            .get(topic)
            .map(|q| q.ready.len() + q.inflight.len())
            .unwrap_or(0))
    }
}
