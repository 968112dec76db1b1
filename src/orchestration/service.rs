//! Run lifecycle state machine.
//!
//! One handler per event type. Every handler first persists the consumed
//! envelope as an audit row; the row's uniqueness constraints make the
//! handler a no-op on duplicate delivery, and progress floors make it
//! idempotent even if a duplicate slips through with a new event id.

use crate::constants::{defaults, error_codes, event_types};
use crate::error::Result;
use crate::events::EventEnvelope;
use crate::messaging::{publish_envelope, topics, MessageBus};
use crate::models::{AuditEvent, Job, JobType, Run, RunStage, RunStatus};
use crate::registry::RoutingTable;
use crate::storage::{EventStore, InsertOutcome, JobStore, RunStore};
use serde_json::{json, Value};
use std::sync::Arc;

const PRODUCER: &str = "orchestrator";

pub struct OrchestratorService {
    runs: Arc<dyn RunStore>,
    jobs: Arc<dyn JobStore>,
    events: Arc<dyn EventStore>,
    bus: Arc<dyn MessageBus>,
    routing: Arc<RoutingTable>,
    dispatch_timeout_ms: u64,
}

impl OrchestratorService {
    pub fn new(
        runs: Arc<dyn RunStore>,
        jobs: Arc<dyn JobStore>,
        events: Arc<dyn EventStore>,
        bus: Arc<dyn MessageBus>,
        routing: Arc<RoutingTable>,
        dispatch_timeout_ms: u64,
    ) -> Self {
        Self {
            runs,
            jobs,
            events,
            bus,
            routing,
            dispatch_timeout_ms,
        }
    }

    /// Consume one envelope: audit it, then apply the matching state
    /// transition. Duplicate deliveries are detected at the audit insert
    /// and dropped before any state is touched.
    pub async fn handle_event(&self, envelope: &EventEnvelope) -> Result<()> {
        let audit = AuditEvent {
            event_id: envelope.event_id.clone(),
            event_type: envelope.event_type.clone(),
            producer: envelope.producer.clone(),
            tenant_id: envelope.tenant_id.clone(),
            project_id: envelope.project_id.clone(),
            run_id: envelope.run_id.clone(),
            job_id: envelope.job_id.clone(),
            trace_id: envelope.trace_id.clone(),
            correlation_id: envelope.correlation_id.clone(),
            idempotency_key: envelope.idempotency_key.clone(),
            occurred_at: envelope.occurred_at,
            payload: envelope.payload.clone(),
        };
        if self.events.insert(&audit).await? == InsertOutcome::Duplicate {
            tracing::info!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                idempotency_key = %envelope.idempotency_key,
                "duplicate delivery, skipping"
            );
            return Ok(());
        }

        match envelope.event_type.as_str() {
            event_types::TASK_SUBMITTED => self.on_task_submitted(envelope).await,
            event_types::JOB_CLAIMED => self.on_job_claimed(envelope).await,
            event_types::JOB_SUCCEEDED => self.on_job_succeeded(envelope).await,
            event_types::JOB_FAILED => self.on_job_failed(envelope).await,
            event_types::COMPOSE_COMPLETED => self.on_compose_completed(envelope).await,
            event_types::COMPOSE_FAILED => self.on_compose_failed(envelope).await,
            event_types::KB_VERSION_ROLLED_BACK => self.on_kb_version_rolled_back(envelope).await,
            other => {
                // Unmatched event types are audit-only.
                tracing::debug!(event_type = other, "event audited without state transition");
                Ok(())
            }
        }
    }

    /// Load the run for an envelope, refusing to mutate terminal runs.
    async fn load_open_run(&self, envelope: &EventEnvelope) -> Result<Option<Run>> {
        let Some(run_id) = envelope.run_id.as_deref() else {
            tracing::warn!(
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                "envelope carries no run_id, skipping"
            );
            return Ok(None);
        };
        let Some(run) = self.runs.get(run_id).await? else {
            tracing::warn!(run_id, event_type = %envelope.event_type, "unknown run, skipping");
            return Ok(None);
        };
        if run.is_terminal() {
            tracing::info!(
                run_id,
                status = ?run.status,
                event_type = %envelope.event_type,
                "run already terminal, ignoring late event"
            );
            return Ok(None);
        }
        Ok(Some(run))
    }

    async fn on_task_submitted(&self, envelope: &EventEnvelope) -> Result<()> {
        let run_id = envelope
            .run_id
            .clone()
            .unwrap_or_else(Run::mint_id);
        if let Some(existing) = self.runs.get(&run_id).await? {
            tracing::info!(run_id = %existing.id, "run already exists, skipping submission");
            return Ok(());
        }

        let mut run = Run::new(
            &run_id,
            &envelope.tenant_id,
            &envelope.project_id,
            &envelope.trace_id,
            &envelope.correlation_id,
            &envelope.idempotency_key,
        );
        run.stage = RunStage::Route;
        run.status = RunStatus::Running;
        run.touch();
        self.runs.insert(&run).await?;

        let job_type = envelope
            .payload
            .get("job_type")
            .cloned()
            .and_then(|v| serde_json::from_value::<JobType>(v).ok())
            .unwrap_or(JobType::IngestStory);
        let worker_type = self.routing.resolve(job_type)?;
        let fallback_chain: Vec<String> = self
            .routing
            .fallback_chain(job_type)
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();

        let mut job = Job::new(
            Job::mint_id(),
            &run.id,
            &run.tenant_id,
            &run.project_id,
            job_type,
            envelope.payload.clone(),
        );
        job.trace_id = Some(envelope.trace_id.clone());
        job.correlation_id = Some(envelope.correlation_id.clone());
        self.jobs.insert(&job).await?;

        let created = envelope
            .derive(event_types::JOB_CREATED, PRODUCER)
            .with_run(&run.id)
            .with_job(&job.id)
            .with_payload(json!({
                "job_type": job_type,
                "worker_type": worker_type.as_str(),
                "timeout_ms": self.dispatch_timeout_ms,
                "fallback_chain": fallback_chain,
                "payload": job.payload,
            }));
        publish_envelope(self.bus.as_ref(), topics::JOB_DISPATCH, &created).await?;

        tracing::info!(
            run_id = %run.id,
            job_id = %job.id,
            job_type = ?job_type,
            worker_type = %worker_type,
            "task accepted, job created"
        );
        self.emit_stage_changed(&run, envelope).await
    }

    async fn on_job_claimed(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(mut run) = self.load_open_run(envelope).await? else {
            return Ok(());
        };
        run.stage = RunStage::Execute;
        run.status = RunStatus::Running;
        run.raise_progress(defaults::PROGRESS_CLAIMED);
        run.touch();
        self.runs.update(&run).await?;
        self.emit_stage_changed(&run, envelope).await
    }

    async fn on_job_succeeded(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(mut run) = self.load_open_run(envelope).await? else {
            return Ok(());
        };
        run.stage = RunStage::Compose;
        run.raise_progress(defaults::PROGRESS_JOB_SUCCEEDED);
        run.touch();
        self.runs.update(&run).await?;

        let artifact_uri = envelope.payload_str("artifact_uri").map(str::to_string);
        let compose = envelope
            .derive(event_types::COMPOSE_STARTED, PRODUCER)
            .with_payload(json!({
                "artifact_uri": artifact_uri,
            }));
        publish_envelope(self.bus.as_ref(), topics::COMPOSE_DISPATCH, &compose).await?;

        tracing::info!(run_id = %run.id, ?artifact_uri, "execution complete, composition started");
        self.emit_stage_changed(&run, envelope).await
    }

    async fn on_job_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(mut run) = self.load_open_run(envelope).await? else {
            return Ok(());
        };
        let error_code = envelope
            .payload_str("error_code")
            .unwrap_or(error_codes::WORKER_EXEC)
            .to_string();
        let error_message = envelope
            .payload_str("error_message")
            .unwrap_or("worker execution failed")
            .to_string();
        // Stage stays where the failure happened.
        run.record_failure(&error_code, &error_message);
        run.touch();
        self.runs.update(&run).await?;

        tracing::error!(run_id = %run.id, %error_code, %error_message, "run failed in execution");
        self.emit_stage_changed(&run, envelope).await
    }

    async fn on_compose_completed(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(mut run) = self.load_open_run(envelope).await? else {
            return Ok(());
        };
        run.stage = RunStage::Observe;
        run.status = RunStatus::Success;
        run.raise_progress(defaults::PROGRESS_COMPLETE);
        run.final_artifact_uri = envelope.payload_str("final_artifact_uri").map(str::to_string);
        run.touch();
        self.runs.update(&run).await?;

        tracing::info!(
            run_id = %run.id,
            final_artifact_uri = ?run.final_artifact_uri,
            "run completed"
        );
        self.emit_stage_changed(&run, envelope).await
    }

    async fn on_compose_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let Some(mut run) = self.load_open_run(envelope).await? else {
            return Ok(());
        };
        let error_code = envelope
            .payload_str("error_code")
            .unwrap_or(error_codes::COMPOSE_FFMPEG)
            .to_string();
        let error_message = envelope
            .payload_str("error_message")
            .unwrap_or("composition failed")
            .to_string();
        run.stage = RunStage::Compose;
        run.record_failure(&error_code, &error_message);
        run.touch();
        self.runs.update(&run).await?;

        tracing::error!(run_id = %run.id, %error_code, "run failed in composition");
        self.emit_stage_changed(&run, envelope).await
    }

    /// Compensation: a knowledge-base version was rolled back upstream.
    /// Unless the originator already applied the rollback, enqueue a
    /// `rollback_kb_version` job so a skill dispatcher brings local state
    /// back in line.
    async fn on_kb_version_rolled_back(&self, envelope: &EventEnvelope) -> Result<()> {
        let applied = envelope
            .payload
            .get("applied_by_originator")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if applied {
            tracing::info!(
                run_id = ?envelope.run_id,
                "rollback already applied by originator, audit only"
            );
            return Ok(());
        }
        let Some(run_id) = envelope.run_id.as_deref() else {
            tracing::warn!("kb rollback event without run_id, audit only");
            return Ok(());
        };

        let mut job = Job::new(
            Job::mint_id(),
            run_id,
            &envelope.tenant_id,
            &envelope.project_id,
            JobType::RollbackKbVersion,
            envelope.payload.clone(),
        );
        job.trace_id = Some(envelope.trace_id.clone());
        job.correlation_id = Some(envelope.correlation_id.clone());
        self.jobs.insert(&job).await?;

        tracing::info!(run_id, job_id = %job.id, "compensation job enqueued for kb rollback");
        Ok(())
    }

    /// Publish `run.stage.changed` after every state mutation so observers
    /// see the run's new shape without polling.
    async fn emit_stage_changed(&self, run: &Run, source: &EventEnvelope) -> Result<()> {
        let changed = source
            .derive(event_types::RUN_STAGE_CHANGED, PRODUCER)
            .with_run(&run.id)
            .with_payload(json!({
                "stage": run.stage,
                "status": run.status,
                "progress": run.progress,
                "source_event_type": source.event_type,
            }));
        publish_envelope(self.bus.as_ref(), topics::JOB_STATUS, &changed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryBus;
    use crate::models::JobStatus;
    use crate::storage::{MemoryEventStore, MemoryJobStore, MemoryRunStore};

    struct Fixture {
        service: OrchestratorService,
        runs: Arc<MemoryRunStore>,
        jobs: Arc<MemoryJobStore>,
        bus: Arc<InMemoryBus>,
    }

    fn fixture() -> Fixture {
        let runs = Arc::new(MemoryRunStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let service = OrchestratorService::new(
            runs.clone(),
            jobs.clone(),
            events.clone(),
            bus.clone(),
            Arc::new(RoutingTable::with_default_routes()),
            defaults::DISPATCH_TIMEOUT_MS,
        );
        Fixture {
            service,
            runs,
            jobs,
            bus,
        }
    }

    fn submitted(run_id: &str) -> EventEnvelope {
        EventEnvelope::new(
            event_types::TASK_SUBMITTED,
            "gateway",
            "t1",
            "p1",
            format!("idem_{run_id}"),
        )
        .with_run(run_id)
        .with_tracing("tr_1", "cr_1")
        .with_payload(json!({"story": "a fox in the snow"}))
    }

    async fn drain_topic(bus: &InMemoryBus, topic: &str) -> Vec<EventEnvelope> {
        let mut envelopes = Vec::new();
        while let Some(msg) = bus.poll(topic).await.unwrap() {
            bus.ack(topic, msg.msg_id).await.unwrap();
            envelopes.push(EventEnvelope::from_json(msg.payload).unwrap());
        }
        envelopes
    }

    #[tokio::test]
    async fn task_submitted_creates_run_and_dispatch_job() {
        let f = fixture();
        f.service.handle_event(&submitted("run_1")).await.unwrap();

        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.stage, RunStage::Route);
        assert_eq!(run.status, RunStatus::Running);

        let created = drain_topic(&f.bus, topics::JOB_DISPATCH).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].event_type, event_types::JOB_CREATED);
        assert_eq!(created[0].payload["job_type"], "ingest_story");
        assert_eq!(created[0].payload["worker_type"], "worker-llm");
        assert_eq!(created[0].payload["timeout_ms"], 60_000);

        let status = drain_topic(&f.bus, topics::JOB_STATUS).await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].event_type, event_types::RUN_STAGE_CHANGED);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped_before_state_changes() {
        let f = fixture();
        let envelope = submitted("run_1");
        f.service.handle_event(&envelope).await.unwrap();
        f.service.handle_event(&envelope).await.unwrap();

        // Only one job.created despite two deliveries.
        assert_eq!(drain_topic(&f.bus, topics::JOB_DISPATCH).await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_with_fresh_event_id_still_dropped() {
        let f = fixture();
        let first = submitted("run_1");
        f.service.handle_event(&first).await.unwrap();

        // Redelivery after a producer retry: new event id, same
        // idempotency key and type.
        let mut retry = submitted("run_1");
        retry.event_id = "evt_other".to_string();
        f.service.handle_event(&retry).await.unwrap();

        assert_eq!(drain_topic(&f.bus, topics::JOB_DISPATCH).await.len(), 1);
    }

    #[tokio::test]
    async fn progress_floors_only_raise() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();

        let succeeded = submitted
            .derive(event_types::JOB_SUCCEEDED, "dispatch-hub")
            .with_job("job_1")
            .with_payload(json!({"artifact_uri": "s3://bucket/clip.mp4"}));
        f.service.handle_event(&succeeded).await.unwrap();
        assert_eq!(f.runs.get("run_1").await.unwrap().unwrap().progress, 70);

        // A late (non-duplicate) claim event must not lower progress.
        let late_claim = submitted
            .derive(event_types::JOB_CLAIMED, "dispatch-hub")
            .with_job("job_1");
        f.service.handle_event(&late_claim).await.unwrap();
        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.progress, 70);
    }

    #[tokio::test]
    async fn job_succeeded_starts_composition_with_artifact() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();
        drain_topic(&f.bus, topics::JOB_STATUS).await;

        let succeeded = submitted
            .derive(event_types::JOB_SUCCEEDED, "dispatch-hub")
            .with_payload(json!({"artifact_uri": "s3://bucket/clip.mp4"}));
        f.service.handle_event(&succeeded).await.unwrap();

        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.stage, RunStage::Compose);

        let compose = drain_topic(&f.bus, topics::COMPOSE_DISPATCH).await;
        assert_eq!(compose.len(), 1);
        assert_eq!(compose[0].event_type, event_types::COMPOSE_STARTED);
        assert_eq!(compose[0].payload["artifact_uri"], "s3://bucket/clip.mp4");
    }

    #[tokio::test]
    async fn job_failed_uses_default_error_code() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();

        let failed = submitted.derive(event_types::JOB_FAILED, "dispatch-hub");
        f.service.handle_event(&failed).await.unwrap();

        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.stage, RunStage::Execute);
        assert_eq!(run.error_code.as_deref(), Some(error_codes::WORKER_EXEC));
    }

    #[tokio::test]
    async fn compose_completed_finalizes_run() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();

        let completed = submitted
            .derive(event_types::COMPOSE_COMPLETED, "compose-worker")
            .with_payload(json!({"final_artifact_uri": "s3://bucket/final.mp4"}));
        f.service.handle_event(&completed).await.unwrap();

        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stage, RunStage::Observe);
        assert_eq!(run.progress, 100);
        assert_eq!(
            run.final_artifact_uri.as_deref(),
            Some("s3://bucket/final.mp4")
        );
    }

    #[tokio::test]
    async fn terminal_run_ignores_late_events() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();
        let completed = submitted
            .derive(event_types::COMPOSE_COMPLETED, "compose-worker")
            .with_payload(json!({"final_artifact_uri": "s3://bucket/final.mp4"}));
        f.service.handle_event(&completed).await.unwrap();

        let late_failure = submitted
            .derive(event_types::COMPOSE_FAILED, "compose-worker")
            .with_payload(json!({"error_message": "late crash"}));
        f.service.handle_event(&late_failure).await.unwrap();

        let run = f.runs.get("run_1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.error_code.is_none());
    }

    #[tokio::test]
    async fn kb_rollback_enqueues_compensation_job() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();

        let rolled_back = submitted
            .derive(event_types::KB_VERSION_ROLLED_BACK, "kb-service")
            .with_payload(json!({"kb_version": "v41"}));
        f.service.handle_event(&rolled_back).await.unwrap();

        let enqueued = f
            .jobs
            .list_by_status(JobStatus::Enqueued, Some("run_1"))
            .await
            .unwrap();
        let rollback_jobs: Vec<_> = enqueued
            .iter()
            .filter(|j| j.job_type == JobType::RollbackKbVersion)
            .collect();
        assert_eq!(rollback_jobs.len(), 1);
        assert_eq!(rollback_jobs[0].payload["kb_version"], "v41");
    }

    #[tokio::test]
    async fn kb_rollback_applied_by_originator_is_audit_only() {
        let f = fixture();
        let submitted = submitted("run_1");
        f.service.handle_event(&submitted).await.unwrap();

        let rolled_back = submitted
            .derive(event_types::KB_VERSION_ROLLED_BACK, "kb-service")
            .with_payload(json!({"kb_version": "v41", "applied_by_originator": true}));
        f.service.handle_event(&rolled_back).await.unwrap();

        let enqueued = f
            .jobs
            .list_by_status(JobStatus::Enqueued, Some("run_1"))
            .await
            .unwrap();
        assert!(enqueued
            .iter()
            .all(|j| j.job_type != JobType::RollbackKbVersion));
    }
}
