//! Background topic consumers.
//!
//! Each consumer is a polling loop over one durable topic with a shared
//! shutdown signal. Failure policy differs per topic:
//!
//! - orchestrator topics: handler errors nack for redelivery, malformed
//!   payloads are acked away so a poison message cannot wedge the loop
//! - `job.dispatch`: the hub is the sole consumer; assigned work is
//!   republished onto the owning pool's queue before the ack, capacity
//!   exhaustion nacks for a later retry, other failures dead-letter to
//!   `job.dispatch.dlq`
//! - `worker.detail`: failures republish to `worker.callback.retry`
//! - `alert.events`: due retries re-enter [`AlertNotifier::send`] with
//!   their recorded attempt number, not-yet-due retries stay queued
//!
//! A skill dispatcher loop drains enqueued in-process jobs (compensation
//! work) alongside the topic consumers. All consumers are gated behind
//! `REELFORGE_ENABLE_CONSUMERS` so test processes never race live ones
//! for queue messages.

use crate::config::CoreConfig;
use crate::dispatch::{DispatchHub, SkillDispatcher};
use crate::error::{CoreError, Result};
use crate::events::EventEnvelope;
use crate::messaging::{topics, AlertRetryMessage, MessageBus, WorkerResult};
use crate::notify::{AlertMessage, AlertNotifier};
use crate::orchestration::OrchestratorService;
use crate::storage::JobStore;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Topics the orchestrator state machine consumes.
const ORCHESTRATOR_TOPICS: [&str; 4] = [
    topics::TASK_SUBMITTED,
    topics::JOB_STATUS,
    topics::COMPOSE_STATUS,
    topics::SKILL_EVENTS,
];

pub struct ConsumerHandles {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandles {
    /// Signal all consumer loops to stop and wait for them to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Spawn the consumer loops if the config enables them.
pub fn spawn_consumers(
    config: &CoreConfig,
    orchestrator: Arc<OrchestratorService>,
    hub: Arc<DispatchHub>,
    jobs: Arc<dyn JobStore>,
    bus: Arc<dyn MessageBus>,
    skills: Arc<SkillDispatcher>,
    notifier: Option<Arc<AlertNotifier>>,
) -> Option<ConsumerHandles> {
    if !config.enable_consumers {
        tracing::info!("background consumers disabled by configuration");
        return None;
    }
    let (shutdown, _) = watch::channel(false);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut tasks = Vec::new();

    for topic in ORCHESTRATOR_TOPICS {
        let orchestrator = orchestrator.clone();
        let bus = bus.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!(topic, "orchestrator consumer started");
            loop {
                match consume_orchestrator_once(orchestrator.as_ref(), bus.as_ref(), topic).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => tracing::error!(topic, error = %err, "consumer step failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = rx.changed() => if res.is_err() || *rx.borrow() { break },
                }
            }
            tracing::info!(topic, "orchestrator consumer stopped");
        }));
    }

    {
        let hub = hub.clone();
        let jobs = jobs.clone();
        let bus = bus.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!(topic = topics::JOB_DISPATCH, "dispatch consumer started");
            loop {
                match consume_dispatch_once(hub.as_ref(), jobs.as_ref(), bus.as_ref()).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "dispatch consumer step failed")
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = rx.changed() => if res.is_err() || *rx.borrow() { break },
                }
            }
            tracing::info!(topic = topics::JOB_DISPATCH, "dispatch consumer stopped");
        }));
    }

    {
        let hub = hub.clone();
        let bus = bus.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!(topic = topics::WORKER_DETAIL, "result consumer started");
            loop {
                match consume_result_once(hub.as_ref(), bus.as_ref()).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => tracing::error!(error = %err, "result consumer step failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = rx.changed() => if res.is_err() || *rx.borrow() { break },
                }
            }
            tracing::info!(topic = topics::WORKER_DETAIL, "result consumer stopped");
        }));
    }

    {
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!("skill dispatcher started");
            loop {
                match skills.process_enqueued(None).await {
                    Ok(0) => {}
                    Ok(handled) => {
                        tracing::info!(handled, "skill jobs executed");
                        continue;
                    }
                    Err(err) => tracing::error!(error = %err, "skill dispatch step failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = rx.changed() => if res.is_err() || *rx.borrow() { break },
                }
            }
            tracing::info!("skill dispatcher stopped");
        }));
    }

    if let Some(notifier) = notifier {
        let bus = bus.clone();
        let mut rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            tracing::info!(topic = topics::ALERT_EVENTS, "alert retry consumer started");
            loop {
                match consume_alert_retry_once(notifier.as_ref(), bus.as_ref()).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => tracing::error!(error = %err, "alert retry step failed"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    res = rx.changed() => if res.is_err() || *rx.borrow() { break },
                }
            }
            tracing::info!(topic = topics::ALERT_EVENTS, "alert retry consumer stopped");
        }));
    }

    Some(ConsumerHandles { shutdown, tasks })
}

/// Consume one orchestrator-bound envelope. Returns true when the loop
/// should poll again immediately, false when it should sleep first (empty
/// topic, or a nacked message awaiting redelivery).
pub async fn consume_orchestrator_once(
    orchestrator: &OrchestratorService,
    bus: &dyn MessageBus,
    topic: &str,
) -> Result<bool> {
    let Some(msg) = bus.poll(topic).await? else {
        return Ok(false);
    };
    let envelope = match EventEnvelope::from_json(msg.payload.clone()) {
        Ok(env) => env,
        Err(err) => {
            tracing::warn!(topic, msg_id = msg.msg_id, error = %err, "malformed envelope, dropping");
            bus.ack(topic, msg.msg_id).await?;
            return Ok(true);
        }
    };
    match orchestrator.handle_event(&envelope).await {
        Ok(()) => {
            bus.ack(topic, msg.msg_id).await?;
            Ok(true)
        }
        Err(err) => {
            tracing::error!(
                topic,
                event_id = %envelope.event_id,
                error = %err,
                "handler failed, returning message for redelivery"
            );
            bus.nack(topic, msg.msg_id).await?;
            Ok(false)
        }
    }
}

/// Consume one `job.created` envelope: hand the job to the hub and, once
/// a node is assigned, republish the envelope onto the owning pool's
/// dispatch queue. Returns true when the loop should poll again
/// immediately.
pub async fn consume_dispatch_once(
    hub: &DispatchHub,
    jobs: &dyn JobStore,
    bus: &dyn MessageBus,
) -> Result<bool> {
    let topic = topics::JOB_DISPATCH;
    let Some(msg) = bus.poll(topic).await? else {
        return Ok(false);
    };

    match dispatch_from_message(hub, jobs, &msg.payload).await {
        Ok((envelope, worker_type)) => {
            let pool_queue = topics::pool_dispatch(&worker_type);
            bus.publish(&pool_queue, &envelope.to_json()?).await?;
            bus.ack(topic, msg.msg_id).await?;
            Ok(true)
        }
        Err(CoreError::NoAvailableNode { pool }) => {
            // Capacity will free up; keep the message on the topic and let
            // the loop back off before re-claiming it.
            tracing::warn!(%pool, msg_id = msg.msg_id, "pool saturated, redelivering");
            bus.nack(topic, msg.msg_id).await?;
            Ok(false)
        }
        Err(err) => {
            tracing::error!(msg_id = msg.msg_id, error = %err, "dispatch failed, dead-lettering");
            let dead = json!({
                "original": msg.payload,
                "error": err.to_string(),
            });
            bus.publish(topics::JOB_DISPATCH_DLQ, &dead).await?;
            bus.ack(topic, msg.msg_id).await?;
            Ok(true)
        }
    }
}

async fn dispatch_from_message(
    hub: &DispatchHub,
    jobs: &dyn JobStore,
    payload: &Value,
) -> Result<(EventEnvelope, String)> {
    let mut envelope = EventEnvelope::from_json(payload.clone())?;
    let worker_type = envelope
        .payload_str("worker_type")
        .ok_or_else(|| CoreError::Messaging("dispatch envelope without worker_type".to_string()))?
        .to_string();
    let job_id = envelope
        .job_id
        .as_deref()
        .ok_or_else(|| CoreError::Messaging("dispatch envelope without job_id".to_string()))?;
    let job = jobs
        .get(job_id)
        .await?
        .ok_or_else(|| CoreError::Messaging(format!("dispatch for unknown job '{job_id}'")))?;
    let node_id = hub.dispatch(&job).await?;
    if let Value::Object(map) = &mut envelope.payload {
        map.insert("node_id".to_string(), json!(node_id));
    }
    Ok((envelope, worker_type))
}

/// Consume one raw worker result and absorb it through the hub. Returns
/// true when the loop should poll again immediately.
pub async fn consume_result_once(hub: &DispatchHub, bus: &dyn MessageBus) -> Result<bool> {
    let topic = topics::WORKER_DETAIL;
    let Some(msg) = bus.poll(topic).await? else {
        return Ok(false);
    };

    let outcome = match serde_json::from_value::<WorkerResult>(msg.payload.clone()) {
        Ok(result) => hub.handle_callback(&result).await.map(|_| ()),
        Err(err) => Err(CoreError::Serialization(err)),
    };
    match outcome {
        Ok(()) => bus.ack(topic, msg.msg_id).await?,
        Err(err) => {
            tracing::error!(msg_id = msg.msg_id, error = %err, "callback failed, queueing retry");
            let retry = json!({
                "original": msg.payload,
                "error": err.to_string(),
            });
            bus.publish(topics::WORKER_CALLBACK_RETRY, &retry).await?;
            bus.ack(topic, msg.msg_id).await?;
        }
    }
    Ok(true)
}

/// Consume one queued alert retry. A retry that is not yet due stays on
/// the topic and the loop sleeps; a due retry re-enters the notifier with
/// its recorded attempt number, which requeues or drops it under the same
/// backoff and budget rules as the first send.
pub async fn consume_alert_retry_once(
    notifier: &AlertNotifier,
    bus: &dyn MessageBus,
) -> Result<bool> {
    let topic = topics::ALERT_EVENTS;
    let Some(msg) = bus.poll(topic).await? else {
        return Ok(false);
    };
    let retry: AlertRetryMessage = match serde_json::from_value(msg.payload.clone()) {
        Ok(retry) => retry,
        Err(err) => {
            tracing::warn!(topic, msg_id = msg.msg_id, error = %err, "malformed retry payload, dropping");
            bus.ack(topic, msg.msg_id).await?;
            return Ok(true);
        }
    };
    if Utc::now() < retry.due_at() {
        bus.nack(topic, msg.msg_id).await?;
        return Ok(false);
    }

    let alert = AlertMessage::from_retry(&retry);
    let outcome = notifier.send(&alert, retry.retry_attempt, true).await?;
    tracing::info!(
        tenant_id = %retry.tenant_id,
        retry_attempt = retry.retry_attempt,
        ?outcome,
        "alert retry processed"
    );
    bus.ack(topic, msg.msg_id).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyConfig;
    use crate::constants::{defaults, event_types};
    use crate::messaging::InMemoryBus;
    use crate::models::{Job, JobStatus, JobType, WorkerPool};
    use crate::notify::{AlertTransport, CircuitBreakerRegistry, DeliveryError};
    use crate::registry::{NodeRegistry, RoutingTable};
    use crate::storage::{MemoryEventStore, MemoryJobStore, MemoryRunStore};
    use async_trait::async_trait;

    struct Fixture {
        orchestrator: Arc<OrchestratorService>,
        hub: Arc<DispatchHub>,
        jobs: Arc<MemoryJobStore>,
        bus: Arc<InMemoryBus>,
        nodes: Arc<NodeRegistry>,
    }

    fn fixture() -> Fixture {
        let runs = Arc::new(MemoryRunStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let routing = Arc::new(RoutingTable::with_default_routes());
        let nodes = Arc::new(NodeRegistry::new(60));
        let orchestrator = Arc::new(OrchestratorService::new(
            runs,
            jobs.clone(),
            events,
            bus.clone(),
            routing.clone(),
            defaults::DISPATCH_TIMEOUT_MS,
        ));
        let hub = Arc::new(DispatchHub::new(
            routing,
            nodes.clone(),
            jobs.clone(),
            bus.clone(),
        ));
        Fixture {
            orchestrator,
            hub,
            jobs,
            bus,
            nodes,
        }
    }

    fn created_envelope(job_id: &str) -> EventEnvelope {
        EventEnvelope::new(event_types::JOB_CREATED, "orchestrator", "t1", "p1", "idem_1")
            .with_run("run_1")
            .with_job(job_id)
            .with_tracing("tr", "cr")
            .with_payload(json!({
                "job_type": "render_video",
                "worker_type": "worker-video",
                "timeout_ms": 60000,
                "fallback_chain": [],
                "payload": {"scene": 1},
            }))
    }

    #[tokio::test]
    async fn dispatch_consumer_routes_claimed_job_to_pool_queue() {
        let f = fixture();
        f.nodes.register("node-a", WorkerPool::Video, 2, None);
        let job = Job::new("job_1", "run_1", "t1", "p1", JobType::RenderVideo, json!({}));
        f.jobs.insert(&job).await.unwrap();

        f.bus
            .publish(topics::JOB_DISPATCH, &created_envelope("job_1").to_json().unwrap())
            .await
            .unwrap();

        assert!(consume_dispatch_once(&f.hub, f.jobs.as_ref(), f.bus.as_ref())
            .await
            .unwrap());
        let stored = f.jobs.get("job_1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Claimed);
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH).await.unwrap(), 0);

        // The assigned envelope lands on the pool's own queue with the
        // node stamped in, so the owning workers receive the payload.
        let queue = topics::pool_dispatch("worker-video");
        let msg = f.bus.poll(&queue).await.unwrap().unwrap();
        let envelope = EventEnvelope::from_json(msg.payload).unwrap();
        assert_eq!(envelope.job_id.as_deref(), Some("job_1"));
        assert_eq!(envelope.payload["node_id"], "node-a");
        assert_eq!(envelope.payload["payload"]["scene"], 1);
    }

    #[tokio::test]
    async fn saturated_pool_redelivers_and_signals_backoff() {
        let f = fixture();
        let job = Job::new("job_1", "run_1", "t1", "p1", JobType::RenderVideo, json!({}));
        f.jobs.insert(&job).await.unwrap();

        f.bus
            .publish(topics::JOB_DISPATCH, &created_envelope("job_1").to_json().unwrap())
            .await
            .unwrap();

        // No node: the message stays queued and the consumer asks the loop
        // to sleep instead of re-claiming it in a hot spin.
        let again = consume_dispatch_once(&f.hub, f.jobs.as_ref(), f.bus.as_ref())
            .await
            .unwrap();
        assert!(!again);
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH).await.unwrap(), 1);
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH_DLQ).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_dispatch_job_goes_to_dead_letter() {
        let f = fixture();
        f.bus
            .publish(
                topics::JOB_DISPATCH,
                &created_envelope("job_missing").to_json().unwrap(),
            )
            .await
            .unwrap();

        consume_dispatch_once(&f.hub, f.jobs.as_ref(), f.bus.as_ref())
            .await
            .unwrap();
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH).await.unwrap(), 0);
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH_DLQ).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_result_goes_to_retry_topic() {
        let f = fixture();
        f.bus
            .publish(topics::WORKER_DETAIL, &json!({"not": "a result"}))
            .await
            .unwrap();

        consume_result_once(&f.hub, f.bus.as_ref()).await.unwrap();
        assert_eq!(f.bus.depth(topics::WORKER_DETAIL).await.unwrap(), 0);
        assert_eq!(f.bus.depth(topics::WORKER_CALLBACK_RETRY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn orchestrator_consumer_acks_handled_envelope() {
        let f = fixture();
        let envelope = EventEnvelope::new(event_types::TASK_SUBMITTED, "gateway", "t1", "p1", "idem_1")
            .with_run("run_1")
            .with_tracing("tr", "cr")
            .with_payload(json!({"story": "hello"}));
        f.bus
            .publish(topics::TASK_SUBMITTED, &envelope.to_json().unwrap())
            .await
            .unwrap();

        assert!(consume_orchestrator_once(
            f.orchestrator.as_ref(),
            f.bus.as_ref(),
            topics::TASK_SUBMITTED
        )
        .await
        .unwrap());
        assert_eq!(f.bus.depth(topics::TASK_SUBMITTED).await.unwrap(), 0);
        // The created job envelope landed on the dispatch topic.
        assert_eq!(f.bus.depth(topics::JOB_DISPATCH).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped_not_wedged() {
        let f = fixture();
        f.bus
            .publish(topics::JOB_STATUS, &json!({"garbage": true}))
            .await
            .unwrap();

        consume_orchestrator_once(f.orchestrator.as_ref(), f.bus.as_ref(), topics::JOB_STATUS)
            .await
            .unwrap();
        assert_eq!(f.bus.depth(topics::JOB_STATUS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_skill_loop_executes_enqueued_compensation() {
        let f = fixture();
        let skills = Arc::new(SkillDispatcher::new(
            Arc::new(crate::skills::default_registry()),
            f.jobs.clone(),
        ));
        let job = Job::new(
            "job_rb",
            "run_1",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({"kb_version": "v41"}),
        );
        f.jobs.insert(&job).await.unwrap();

        let mut config = CoreConfig::default();
        config.poll_interval_ms = 10;
        let handles = spawn_consumers(
            &config,
            f.orchestrator.clone(),
            f.hub.clone(),
            f.jobs.clone(),
            f.bus.clone(),
            skills,
            None,
        )
        .unwrap();

        let mut stored = f.jobs.get("job_rb").await.unwrap().unwrap();
        for _ in 0..50 {
            if stored.status != JobStatus::Enqueued {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stored = f.jobs.get("job_rb").await.unwrap().unwrap();
        }
        handles.stop().await;

        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.result.unwrap()["rolled_back_to"], "v41");
    }

    /// Scripted transport: pops the next outcome per delivery.
    struct ScriptedTransport {
        script: parking_lot::Mutex<Vec<std::result::Result<(), DeliveryError>>>,
    }

    #[async_trait]
    impl AlertTransport for ScriptedTransport {
        async fn deliver(&self, _message: &AlertMessage) -> std::result::Result<(), DeliveryError> {
            self.script.lock().pop().unwrap_or(Ok(()))
        }
    }

    fn retry_notifier(
        script: Vec<std::result::Result<(), DeliveryError>>,
        bus: Arc<InMemoryBus>,
    ) -> AlertNotifier {
        AlertNotifier::new(
            Arc::new(ScriptedTransport {
                script: parking_lot::Mutex::new(script),
            }),
            Arc::new(CircuitBreakerRegistry::new(3, 60)),
            bus,
            &NotifyConfig::default(),
        )
    }

    fn queued_retry(retry_attempt: u32, delay_ms: u64, enqueued_at: chrono::DateTime<Utc>) -> Value {
        serde_json::to_value(AlertRetryMessage {
            event_type: event_types::ALERT_NOTIFY_RETRY.to_string(),
            tenant_id: "t1".to_string(),
            project_id: "p1".to_string(),
            source_event_type: "job.failed".to_string(),
            summary: "render crashed".to_string(),
            run_id: None,
            job_id: None,
            trace_id: None,
            correlation_id: None,
            extra: json!({}),
            retry_attempt,
            max_retry_attempts: 3,
            retry_reason: "http_error:503".to_string(),
            delay_ms,
            enqueued_at,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn due_alert_retry_is_redelivered() {
        let bus = Arc::new(InMemoryBus::new());
        let notifier = retry_notifier(vec![Ok(())], bus.clone());
        let past = Utc::now() - chrono::Duration::seconds(10);
        bus.publish(topics::ALERT_EVENTS, &queued_retry(1, 1000, past))
            .await
            .unwrap();

        assert!(consume_alert_retry_once(&notifier, bus.as_ref()).await.unwrap());
        assert_eq!(bus.depth(topics::ALERT_EVENTS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn not_yet_due_retry_stays_queued() {
        let bus = Arc::new(InMemoryBus::new());
        let notifier = retry_notifier(vec![Ok(())], bus.clone());
        bus.publish(topics::ALERT_EVENTS, &queued_retry(1, 60_000, Utc::now()))
            .await
            .unwrap();

        let again = consume_alert_retry_once(&notifier, bus.as_ref()).await.unwrap();
        assert!(!again);
        assert_eq!(bus.depth(topics::ALERT_EVENTS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_retry_requeues_with_next_attempt_until_budget() {
        let bus = Arc::new(InMemoryBus::new());
        let notifier = retry_notifier(
            vec![Err(DeliveryError::Status(503)), Err(DeliveryError::Status(503))],
            bus.clone(),
        );
        let past = Utc::now() - chrono::Duration::seconds(10);
        bus.publish(topics::ALERT_EVENTS, &queued_retry(2, 4000, past))
            .await
            .unwrap();

        // Attempt 2 fails and requeues attempt 3.
        consume_alert_retry_once(&notifier, bus.as_ref()).await.unwrap();
        let msg = bus.poll(topics::ALERT_EVENTS).await.unwrap().unwrap();
        let requeued: AlertRetryMessage = serde_json::from_value(msg.payload.clone()).unwrap();
        assert_eq!(requeued.retry_attempt, 3);
        bus.nack(topics::ALERT_EVENTS, msg.msg_id).await.unwrap();

        // Attempt 3 meets the spent budget and is dropped for good. The
        // enqueued_at of the requeued message is fresh, so force it due.
        let mut due = requeued;
        due.enqueued_at = past;
        let msg = bus.poll(topics::ALERT_EVENTS).await.unwrap().unwrap();
        bus.ack(topics::ALERT_EVENTS, msg.msg_id).await.unwrap();
        bus.publish(topics::ALERT_EVENTS, &serde_json::to_value(&due).unwrap())
            .await
            .unwrap();
        consume_alert_retry_once(&notifier, bus.as_ref()).await.unwrap();
        assert_eq!(bus.depth(topics::ALERT_EVENTS).await.unwrap(), 0);
    }
}
