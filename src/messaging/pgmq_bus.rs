//! pgmq-backed bus for multi-process deployments.
//!
//! Topic names use dots; pgmq queue identifiers cannot, so topics map to
//! queues by replacing dots with underscores. Redelivery is driven by the
//! visibility timeout rather than an explicit nack.

use crate::error::{CoreError, Result};
use crate::messaging::bus::{MessageBus, QueuedMessage};
use crate::messaging::topics;
use async_trait::async_trait;
use pgmq::PGMQueue;
use serde_json::Value;
use tracing::{debug, info};

const VISIBILITY_TIMEOUT_SECS: i32 = 30;

#[derive(Clone)]
pub struct PgmqBus {
    pgmq: PGMQueue,
}

impl PgmqBus {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| CoreError::Messaging(format!("pgmq connect failed: {e}")))?;
        info!("connected to pgmq");
        Ok(Self { pgmq })
    }

    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    /// Provision every system topic, including the per-pool dispatch
    /// queues. Idempotent.
    pub async fn ensure_topics(&self) -> Result<()> {
        let mut names: Vec<String> = topics::ALL.iter().map(|t| t.to_string()).collect();
        for pool in crate::models::WorkerPool::ALL {
            names.push(topics::pool_dispatch(pool.as_str()));
        }
        for topic in &names {
            let queue = queue_name(topic);
            self.pgmq
                .create(&queue)
                .await
                .map_err(|e| CoreError::Messaging(format!("create queue {queue} failed: {e}")))?;
            debug!(queue = %queue, "queue ready");
        }
        Ok(())
    }
}

fn queue_name(topic: &str) -> String {
    topic.replace('.', "_")
}

#[async_trait]
impl MessageBus for PgmqBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<i64> {
        let queue = queue_name(topic);
        let msg_id = self
            .pgmq
            .send(&queue, payload)
            .await
            .map_err(|e| CoreError::Messaging(format!("send to {queue} failed: {e}")))?;
        debug!(topic = %topic, msg_id = msg_id, "message published");
        Ok(msg_id)
    }

    async fn poll(&self, topic: &str) -> Result<Option<QueuedMessage>> {
        let queue = queue_name(topic);
        let message = self
            .pgmq
            .read::<Value>(&queue, Some(VISIBILITY_TIMEOUT_SECS))
            .await
            .map_err(|e| CoreError::Messaging(format!("read from {queue} failed: {e}")))?;
        Ok(message.map(|m| QueuedMessage {
            msg_id: m.msg_id,
            payload: m.message,
        }))
    }

    async fn ack(&self, topic: &str, msg_id: i64) -> Result<()> {
        let queue = queue_name(topic);
        self.pgmq
            .delete(&queue, msg_id)
            .await
            .map_err(|e| CoreError::Messaging(format!("delete {msg_id} from {queue} failed: {e}")))?;
        Ok(())
    }

    async fn nack(&self, _topic: &str, _msg_id: i64) -> Result<()> {
        // Redelivery happens when the visibility timeout lapses.
        Ok(())
    }

    async fn depth(&self, _topic: &str) -> Result<usize> {
        // pgmq exposes depth through metrics tables; not needed on the
        // hot path, so report 0 here and let telemetry read the store.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_to_queue_mapping() {
        assert_eq!(queue_name("job.dispatch"), "job_dispatch");
        assert_eq!(queue_name("worker.callback.retry"), "worker_callback_retry");
    }
}
