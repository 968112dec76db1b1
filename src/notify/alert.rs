//! Alert delivery with circuit protection and queued retries.
//!
//! Delivery goes through an [`AlertTransport`] so tests can script
//! failures. An open circuit requeues with a fixed short delay; retryable
//! delivery failures requeue with exponential backoff capped at
//! `max_delay_ms`; attempts past `max_retry_attempts` are dropped and
//! logged.

use crate::config::NotifyConfig;
use crate::constants::event_types;
use crate::error::Result;
use crate::messaging::{topics, AlertRetryMessage, MessageBus};
use crate::notify::CircuitBreakerRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub tenant_id: String,
    pub project_id: String,
    pub event_type: String,
    pub summary: String,
    pub run_id: Option<String>,
    pub job_id: Option<String>,
    pub trace_id: Option<String>,
    pub correlation_id: Option<String>,
    pub extra: Value,
}

impl AlertMessage {
    pub fn new(
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        event_type: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            event_type: event_type.into(),
            summary: summary.into(),
            run_id: None,
            job_id: None,
            trace_id: None,
            correlation_id: None,
            extra: Value::Object(serde_json::Map::new()),
        }
    }

    /// Rebuild the original alert from its queued retry payload.
    pub fn from_retry(retry: &AlertRetryMessage) -> Self {
        Self {
            tenant_id: retry.tenant_id.clone(),
            project_id: retry.project_id.clone(),
            event_type: retry.source_event_type.clone(),
            summary: retry.summary.clone(),
            run_id: retry.run_id.clone(),
            job_id: retry.job_id.clone(),
            trace_id: retry.trace_id.clone(),
            correlation_id: retry.correlation_id.clone(),
            extra: retry.extra.clone(),
        }
    }

    /// Plain-text body delivered to the webhook.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("[ReelForge] {}", self.summary),
            format!("event={}", self.event_type),
        ];
        if let Some(run_id) = &self.run_id {
            lines.push(format!("run_id={run_id}"));
        }
        if let Some(job_id) = &self.job_id {
            lines.push(format!("job_id={job_id}"));
        }
        if let Some(trace_id) = &self.trace_id {
            lines.push(format!("trace_id={trace_id}"));
        }
        if let Some(correlation_id) = &self.correlation_id {
            lines.push(format!("correlation_id={correlation_id}"));
        }
        if !matches!(&self.extra, Value::Object(map) if map.is_empty()) {
            lines.push(format!("extra={}", self.extra));
        }
        lines.push(format!("time={}", Utc::now().to_rfc3339()));
        lines.join("\n")
    }
}


/// Per-scope notification settings. Sourced from tenant configuration;
/// an empty subscription list means "everything".
#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub enabled: bool,
    pub notify_events: Vec<String>,
}

impl NotifySettings {
    pub fn subscribes(&self, event_type: &str) -> bool {
        if self.notify_events.is_empty() {
            return true;
        }
        self.notify_events
            .iter()
            .any(|e| e == event_type || e == "*")
    }
}

#[async_trait]
pub trait NotifySettingsSource: Send + Sync {
    async fn settings_for(&self, tenant_id: &str, project_id: &str) -> Option<NotifySettings>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("destination returned status {0}")]
    Status(u16),

    #[error("network failure: {0}")]
    Network(String),

    #[error("destination acknowledged with malformed body")]
    MalformedAck,
}

impl DeliveryError {
    /// Client errors are permanent; server errors, network trouble, and
    /// garbled acknowledgements are worth retrying.
    pub fn retryable(&self) -> bool {
        match self {
            DeliveryError::Status(code) => *code >= 500,
            DeliveryError::Network(_) | DeliveryError::MalformedAck => true,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            DeliveryError::Status(code) => format!("http_error:{code}"),
            DeliveryError::Network(detail) => format!("network_error:{detail}"),
            DeliveryError::MalformedAck => "malformed_ack".to_string(),
        }
    }
}

#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn deliver(&self, message: &AlertMessage) -> std::result::Result<(), DeliveryError>;
}

/// JSON POST to a configured webhook. A 2xx with a JSON body carrying
/// `"ok": false` counts as a failure even though the transport succeeded.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertTransport for WebhookTransport {
    async fn deliver(&self, message: &AlertMessage) -> std::result::Result<(), DeliveryError> {
        let body = serde_json::json!({
            "text": message.render(),
            "event_type": message.event_type,
            "tenant_id": message.tenant_id,
            "project_id": message.project_id,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        match response.json::<Value>().await {
            Ok(parsed) => {
                if parsed.get("ok").and_then(Value::as_bool) == Some(false) {
                    Err(DeliveryError::MalformedAck)
                } else {
                    Ok(())
                }
            }
            Err(_) => Err(DeliveryError::MalformedAck),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Scope settings turned the notification off before any delivery
    /// attempt.
    Skipped { reason: String },
    /// Circuit open; requeued with the fixed short delay (when allowed).
    CircuitOpen { requeued: bool },
    /// Delivery failed; requeued with exponential backoff.
    Requeued { delay_ms: u64, reason: String },
    /// Delivery failed and the attempt budget is spent, or the failure is
    /// permanent.
    Dropped { reason: String },
}

pub struct AlertNotifier {
    transport: Arc<dyn AlertTransport>,
    circuits: Arc<CircuitBreakerRegistry>,
    bus: Arc<dyn MessageBus>,
    /// Optional per-scope settings gate. Without a source, presence of
    /// the webhook configuration is the only gate.
    settings: Option<Arc<dyn NotifySettingsSource>>,
    max_retry_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl AlertNotifier {
    pub fn new(
        transport: Arc<dyn AlertTransport>,
        circuits: Arc<CircuitBreakerRegistry>,
        bus: Arc<dyn MessageBus>,
        config: &NotifyConfig,
    ) -> Self {
        Self {
            transport,
            circuits,
            bus,
            settings: None,
            max_retry_attempts: config.max_retry_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    pub fn with_settings_source(mut self, source: Arc<dyn NotifySettingsSource>) -> Self {
        self.settings = Some(source);
        self
    }

    /// Exponential backoff for the given attempt, capped.
    pub fn backoff_delay_ms(&self, retry_attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(retry_attempt);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Attempt one delivery. `retry_attempt` is how many retries this
    /// message has already been through; `queue_on_failure` lets callers
    /// fire-and-forget without ever touching the retry queue.
    pub async fn send(
        &self,
        message: &AlertMessage,
        retry_attempt: u32,
        queue_on_failure: bool,
    ) -> Result<NotifyOutcome> {
        let key = CircuitBreakerRegistry::scope_key(&message.tenant_id, &message.project_id);

        if let Some(source) = &self.settings {
            let Some(settings) = source
                .settings_for(&message.tenant_id, &message.project_id)
                .await
            else {
                return Ok(NotifyOutcome::Skipped {
                    reason: "settings_not_found".to_string(),
                });
            };
            if !settings.enabled {
                return Ok(NotifyOutcome::Skipped {
                    reason: "notifications_disabled".to_string(),
                });
            }
            if !settings.subscribes(&message.event_type) {
                return Ok(NotifyOutcome::Skipped {
                    reason: "event_not_subscribed".to_string(),
                });
            }
        }

        if self.circuits.is_open(&key) {
            let can_requeue = queue_on_failure && retry_attempt < self.max_retry_attempts;
            if can_requeue {
                self.enqueue_retry(
                    message,
                    retry_attempt + 1,
                    "circuit_open".to_string(),
                    crate::constants::defaults::CIRCUIT_OPEN_RETRY_DELAY_MS,
                )
                .await?;
            }
            tracing::info!(scope = %key, retry_attempt, "alert short-circuited");
            return Ok(NotifyOutcome::CircuitOpen {
                requeued: can_requeue,
            });
        }

        match self.transport.deliver(message).await {
            Ok(()) => {
                self.circuits.record_success(&key);
                tracing::info!(scope = %key, event_type = %message.event_type, "alert delivered");
                Ok(NotifyOutcome::Delivered)
            }
            Err(err) => {
                self.circuits.record_failure(&key);
                let reason = err.reason();
                if !err.retryable() || !queue_on_failure {
                    tracing::warn!(scope = %key, reason, "alert dropped, not retryable");
                    return Ok(NotifyOutcome::Dropped { reason });
                }
                if retry_attempt >= self.max_retry_attempts {
                    tracing::warn!(
                        scope = %key,
                        retry_attempt,
                        max_retry_attempts = self.max_retry_attempts,
                        reason,
                        "alert dropped, retry budget spent"
                    );
                    return Ok(NotifyOutcome::Dropped { reason });
                }
                let delay_ms = self.backoff_delay_ms(retry_attempt);
                self.enqueue_retry(message, retry_attempt + 1, reason.clone(), delay_ms)
                    .await?;
                Ok(NotifyOutcome::Requeued { delay_ms, reason })
            }
        }
    }

    async fn enqueue_retry(
        &self,
        message: &AlertMessage,
        retry_attempt: u32,
        retry_reason: String,
        delay_ms: u64,
    ) -> Result<()> {
        let retry = AlertRetryMessage {
            event_type: event_types::ALERT_NOTIFY_RETRY.to_string(),
            tenant_id: message.tenant_id.clone(),
            project_id: message.project_id.clone(),
            source_event_type: message.event_type.clone(),
            summary: message.summary.clone(),
            run_id: message.run_id.clone(),
            job_id: message.job_id.clone(),
            trace_id: message.trace_id.clone(),
            correlation_id: message.correlation_id.clone(),
            extra: message.extra.clone(),
            retry_attempt,
            max_retry_attempts: self.max_retry_attempts,
            retry_reason,
            delay_ms,
            enqueued_at: Utc::now(),
        };
        let payload = serde_json::to_value(&retry)?;
        self.bus.publish(topics::ALERT_EVENTS, &payload).await?;
        Ok(())
    }
}
