//! Non-envelope message formats: worker results, dispatch requests, and
//! notification retry payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload an external worker publishes back on `worker.detail` after
/// executing a job. This is a raw result, not an event envelope; the
/// dispatch hub wraps it into `job.succeeded`/`job.failed` envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub job_id: String,
    pub run_id: String,
    pub worker_type: String,
    /// "succeeded" means success; any other value is treated as failure.
    pub status: String,
    #[serde(default)]
    pub artifact_uri: Option<String>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retryable: Option<bool>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl WorkerResult {
    pub fn succeeded(
        job_id: impl Into<String>,
        run_id: impl Into<String>,
        worker_type: impl Into<String>,
        artifact_uri: Option<String>,
        metrics: Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: run_id.into(),
            worker_type: worker_type.into(),
            status: "succeeded".to_string(),
            artifact_uri,
            metrics,
            error_code: None,
            error_message: None,
            retryable: None,
            traceback: None,
            schema_version: default_schema_version(),
        }
    }

    pub fn failed(
        job_id: impl Into<String>,
        run_id: impl Into<String>,
        worker_type: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: run_id.into(),
            worker_type: worker_type.into(),
            status: "failed".to_string(),
            artifact_uri: None,
            metrics: Value::Object(serde_json::Map::new()),
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            retryable: Some(retryable),
            traceback: None,
            schema_version: default_schema_version(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("succeeded")
    }
}

/// Body of `POST /internal/dispatch`: a collaborator asking the hub to
/// enqueue one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub trace_id: String,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub run_id: String,
    pub job_id: String,
    pub job_type: crate::models::JobType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    crate::constants::defaults::DISPATCH_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub job_id: String,
    pub status: String,
}

/// Self-describing retry payload published to `alert.events` when a
/// notification delivery fails for a retryable reason or meets an open
/// circuit. Not an envelope: this is a private queue contract of the
/// notification layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRetryMessage {
    pub event_type: String,
    pub tenant_id: String,
    pub project_id: String,
    pub source_event_type: String,
    pub summary: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub extra: Value,
    pub retry_attempt: u32,
    pub max_retry_attempts: u32,
    pub retry_reason: String,
    pub delay_ms: u64,
    pub enqueued_at: DateTime<Utc>,
}

impl AlertRetryMessage {
    /// Earliest time the retry may be re-attempted.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.enqueued_at + chrono::Duration::milliseconds(self.delay_ms as i64)
    }
}
