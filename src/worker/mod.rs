//! # Worker-Side Job Consumption
//!
//! The loop a worker process runs against its pool's dispatch queue
//! (`job.dispatch.<worker_type>`): pull an assigned envelope, execute the
//! registered handler, and always publish exactly one [`WorkerResult`]
//! back on `worker.detail`. Handler failures become structured failure
//! results, never missing ones. Each pool owns its queue, so a worker
//! never consumes (and can never destroy) another pool's work; an
//! envelope misrouted into the wrong queue is forwarded to its owner,
//! not dropped.
//!
//! Error codes keep the platform-wide wire names (`ValueError`,
//! `TypeError`, `KeyError`, `NotImplementedError`) so a mixed-language
//! worker fleet reports failures uniformly.

use crate::error::{CoreError, Result};
use crate::events::EventEnvelope;
use crate::messaging::{topics, MessageBus, WorkerResult};
use crate::models::JobType;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// A `job.created` envelope flattened into what a handler needs.
#[derive(Debug, Clone)]
pub struct DispatchedJob {
    pub job_id: String,
    pub run_id: String,
    pub job_type: JobType,
    pub worker_type: String,
    pub timeout_ms: u64,
    pub fallback_chain: Vec<String>,
    pub payload: Value,
    pub trace_id: String,
    pub correlation_id: String,
}

impl DispatchedJob {
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        let job_id = envelope
            .job_id
            .clone()
            .ok_or_else(|| CoreError::Messaging("dispatch envelope without job_id".to_string()))?;
        let run_id = envelope
            .run_id
            .clone()
            .ok_or_else(|| CoreError::Messaging("dispatch envelope without run_id".to_string()))?;
        let job_type = envelope
            .payload
            .get("job_type")
            .cloned()
            .map(serde_json::from_value::<JobType>)
            .transpose()?
            .ok_or_else(|| CoreError::Messaging("dispatch envelope without job_type".to_string()))?;
        let worker_type = envelope
            .payload_str("worker_type")
            .ok_or_else(|| {
                CoreError::Messaging("dispatch envelope without worker_type".to_string())
            })?
            .to_string();
        let timeout_ms = envelope
            .payload
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(crate::constants::defaults::DISPATCH_TIMEOUT_MS);
        let fallback_chain = envelope
            .payload
            .get("fallback_chain")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let payload = envelope
            .payload
            .get("payload")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Self {
            job_id,
            run_id,
            job_type,
            worker_type,
            timeout_ms,
            fallback_chain,
            payload,
            trace_id: envelope.trace_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub artifact_uri: Option<String>,
    pub metrics: Value,
}

/// Handler failure. The variant decides both the wire error code and
/// whether the platform may retry the job: bad input can never succeed on
/// retry, infrastructure trouble can.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("missing key: {0}")]
    MissingKey(String),

    #[error("not implemented: {0}")]
    Unimplemented(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("io failure: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl WorkerError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::InvalidInput(_) => "ValueError",
            WorkerError::TypeMismatch(_) => "TypeError",
            WorkerError::MissingKey(_) => "KeyError",
            WorkerError::Unimplemented(_) => "NotImplementedError",
            WorkerError::Upstream(_) => "UpstreamError",
            WorkerError::Io(_) => "IOError",
            WorkerError::Other(_) => "RuntimeError",
        }
    }

    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            WorkerError::InvalidInput(_)
                | WorkerError::TypeMismatch(_)
                | WorkerError::MissingKey(_)
                | WorkerError::Unimplemented(_)
        )
    }
}

#[async_trait]
pub trait WorkerHandler: Send + Sync {
    async fn handle(&self, job: &DispatchedJob) -> std::result::Result<WorkerOutput, WorkerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No message on the queue.
    Empty,
    /// Message was not executed here: malformed payloads are dropped,
    /// misrouted envelopes are forwarded to their owning pool's queue.
    Skipped,
    /// A result was published.
    Executed,
}

/// Pulls assigned envelopes from one pool's dispatch queue and executes
/// them.
pub struct JobConsumerLoop {
    worker_type: String,
    topic: String,
    handler: Arc<dyn WorkerHandler>,
    bus: Arc<dyn MessageBus>,
}

impl JobConsumerLoop {
    pub fn new(
        worker_type: impl Into<String>,
        handler: Arc<dyn WorkerHandler>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let worker_type = worker_type.into();
        let topic = topics::pool_dispatch(&worker_type);
        Self {
            worker_type,
            topic,
            handler,
            bus,
        }
    }

    /// Pull and process at most one dispatch envelope from this pool's
    /// queue.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let topic = self.topic.as_str();
        let Some(msg) = self.bus.poll(topic).await? else {
            return Ok(PollOutcome::Empty);
        };
        let envelope = match EventEnvelope::from_json(msg.payload.clone()) {
            Ok(env) => env,
            Err(err) => {
                tracing::warn!(msg_id = msg.msg_id, error = %err, "malformed dispatch, dropping");
                self.bus.ack(topic, msg.msg_id).await?;
                return Ok(PollOutcome::Skipped);
            }
        };
        let job = match DispatchedJob::from_envelope(&envelope) {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(
                    event_id = %envelope.event_id,
                    error = %err,
                    "incomplete dispatch envelope, dropping"
                );
                self.bus.ack(topic, msg.msg_id).await?;
                return Ok(PollOutcome::Skipped);
            }
        };
        if job.worker_type != self.worker_type {
            // Publisher routed the envelope into the wrong pool's queue.
            // Forward it to the owner before completing the local copy so
            // the dispatch is never lost.
            tracing::warn!(
                job_id = %job.job_id,
                owner = %job.worker_type,
                queue = topic,
                "misrouted dispatch, forwarding to owning pool"
            );
            self.bus
                .publish(&topics::pool_dispatch(&job.worker_type), &msg.payload)
                .await?;
            self.bus.ack(topic, msg.msg_id).await?;
            return Ok(PollOutcome::Skipped);
        }

        // Exactly one result per executed job, success or failure.
        let result = match self.handler.handle(&job).await {
            Ok(output) => {
                tracing::info!(job_id = %job.job_id, "job executed");
                WorkerResult::succeeded(
                    &job.job_id,
                    &job.run_id,
                    &self.worker_type,
                    output.artifact_uri,
                    output.metrics,
                )
            }
            Err(err) => {
                tracing::error!(
                    job_id = %job.job_id,
                    error_code = err.code(),
                    retryable = err.retryable(),
                    error = %err,
                    "job execution failed"
                );
                let mut failed = WorkerResult::failed(
                    &job.job_id,
                    &job.run_id,
                    &self.worker_type,
                    err.code(),
                    err.to_string(),
                    err.retryable(),
                );
                failed.traceback = Some(format!("{err:?}"));
                failed
            }
        };
        let payload = serde_json::to_value(&result)?;
        self.bus.publish(topics::WORKER_DETAIL, &payload).await?;
        self.bus.ack(topic, msg.msg_id).await?;
        Ok(PollOutcome::Executed)
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, poll_interval_ms: u64, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_millis(poll_interval_ms);
        tracing::info!(worker_type = %self.worker_type, "job consumer started");
        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Executed) => continue,
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(worker_type = %self.worker_type, error = %err, "poll failed")
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                res = shutdown.changed() => if res.is_err() || *shutdown.borrow() { break },
            }
        }
        tracing::info!(worker_type = %self.worker_type, "job consumer stopped");
    }
}
