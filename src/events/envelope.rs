//! # Canonical Event Envelope
//!
//! Every message exchanged over the durable topics (except raw worker
//! results and alert retry payloads, see [`crate::messaging::message`]) is
//! wrapped in this envelope. The tracing and idempotency fields are
//! mandatory; `idempotency_key` combined with `event_type` is persisted
//! under a uniqueness constraint so duplicate delivery is detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    #[serde(default = "default_version")]
    pub event_version: String,
    #[serde(default = "default_version")]
    pub schema_version: String,
    pub producer: String,
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: String,
    pub project_id: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    pub trace_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub payload: Value,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        producer: impl Into<String>,
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            event_id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.into(),
            event_version: default_version(),
            schema_version: default_version(),
            producer: producer.into(),
            occurred_at: Utc::now(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            idempotency_key: idempotency_key.into(),
            run_id: None,
            job_id: None,
            trace_id: String::new(),
            correlation_id: String::new(),
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_tracing(
        mut self,
        trace_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        self.trace_id = trace_id.into();
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Derived envelope for a follow-up event in the same causal chain:
    /// fresh event id, same tenancy and tracing context.
    pub fn derive(&self, event_type: impl Into<String>, producer: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            event_id: format!("evt_{}", Uuid::new_v4().simple()),
            idempotency_key: format!("{}:{}", self.idempotency_key, event_type),
            event_type,
            event_version: self.event_version.clone(),
            schema_version: self.schema_version.clone(),
            producer: producer.into(),
            occurred_at: Utc::now(),
            tenant_id: self.tenant_id.clone(),
            project_id: self.project_id.clone(),
            run_id: self.run_id.clone(),
            job_id: self.job_id.clone(),
            trace_id: self.trace_id.clone(),
            correlation_id: self.correlation_id.clone(),
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(json: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json)
    }

    /// String lookup into the payload object.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
