//! Job-to-node assignment and worker result callbacks.

use crate::constants::event_types;
use crate::error::{CoreError, Result};
use crate::messaging::{publish_envelope, topics, MessageBus, WorkerResult};
use crate::models::{Job, JobStatus};
use crate::registry::{NodeRegistry, RoutingTable};
use crate::storage::JobStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

const PRODUCER: &str = "dispatch-hub";

/// Routes a job to the least-loaded live node of its pool, or absorbs a
/// worker's result callback into job state and a status event.
pub struct DispatchHub {
    routing: Arc<RoutingTable>,
    nodes: Arc<NodeRegistry>,
    jobs: Arc<dyn JobStore>,
    bus: Arc<dyn MessageBus>,
}

impl DispatchHub {
    pub fn new(
        routing: Arc<RoutingTable>,
        nodes: Arc<NodeRegistry>,
        jobs: Arc<dyn JobStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            routing,
            nodes,
            jobs,
            bus,
        }
    }

    /// Assign a job to a node. Selection is lowest current load, ties broken
    /// by registration order; the slot is reserved atomically so concurrent
    /// dispatches cannot oversubscribe a node. With no available node the
    /// job stays enqueued and the caller gets [`CoreError::NoAvailableNode`].
    pub async fn dispatch(&self, job: &Job) -> Result<String> {
        let pool = self.routing.resolve(job.job_type)?;

        let node_id = self
            .nodes
            .get_available(pool)
            .into_iter()
            .find(|candidate| self.nodes.reserve_slot(&candidate.node_id))
            .map(|candidate| candidate.node_id);

        let Some(node_id) = node_id else {
            tracing::warn!(
                job_id = %job.id,
                pool = %pool,
                "no available node, job stays enqueued"
            );
            let mut requeued = job.clone();
            requeued.status = JobStatus::Enqueued;
            requeued.locked_by = None;
            requeued.locked_at = None;
            requeued.updated_at = Utc::now();
            self.jobs.update(&requeued).await?;
            return Err(CoreError::NoAvailableNode {
                pool: pool.to_string(),
            });
        };

        let mut claimed = job.clone();
        claimed.status = JobStatus::Claimed;
        claimed.locked_by = Some(node_id.clone());
        claimed.locked_at = Some(Utc::now());
        claimed.updated_at = Utc::now();
        self.jobs.update(&claimed).await?;

        let envelope = crate::events::EventEnvelope::new(
            event_types::JOB_CLAIMED,
            PRODUCER,
            &claimed.tenant_id,
            &claimed.project_id,
            format!("{}:{}", claimed.idempotency_key, event_types::JOB_CLAIMED),
        )
        .with_run(&claimed.run_id)
        .with_job(&claimed.id)
        .with_tracing(
            claimed.trace_or_synthetic(),
            claimed.correlation_or_synthetic(),
        )
        .with_payload(json!({
            "node_id": node_id,
            "worker_type": pool.as_str(),
        }));
        publish_envelope(self.bus.as_ref(), topics::JOB_STATUS, &envelope).await?;

        tracing::info!(job_id = %claimed.id, node_id = %node_id, pool = %pool, "job dispatched");
        Ok(node_id)
    }

    /// Absorb a worker result. Unknown job ids are logged and dropped so a
    /// late callback after cleanup can never fail the consumer. Returns the
    /// event type that was published, if any.
    pub async fn handle_callback(&self, result: &WorkerResult) -> Result<Option<&'static str>> {
        let Some(job) = self.jobs.get(&result.job_id).await? else {
            tracing::warn!(
                job_id = %result.job_id,
                worker_type = %result.worker_type,
                "callback for unknown job, dropping"
            );
            return Ok(None);
        };

        let mut updated = job.clone();
        let event_type = if result.is_success() {
            updated.status = JobStatus::Success;
            updated.result = Some(json!({
                "artifact_uri": result.artifact_uri,
                "metrics": result.metrics,
            }));
            event_types::JOB_SUCCEEDED
        } else {
            updated.status = JobStatus::Failed;
            updated.attempts += 1;
            updated.result = Some(json!({
                "error_code": result.error_code,
                "error_message": result.error_message,
                "retryable": result.retryable,
                "traceback": result.traceback,
            }));
            event_types::JOB_FAILED
        };
        if let Some(node_id) = updated.locked_by.take() {
            self.nodes.release_slot(&node_id);
        }
        updated.locked_at = None;
        updated.updated_at = Utc::now();
        self.jobs.update(&updated).await?;

        let envelope = crate::events::EventEnvelope::new(
            event_type,
            PRODUCER,
            &updated.tenant_id,
            &updated.project_id,
            format!("{}:{}", updated.idempotency_key, event_type),
        )
        .with_run(&updated.run_id)
        .with_job(&updated.id)
        .with_tracing(
            updated.trace_or_synthetic(),
            updated.correlation_or_synthetic(),
        )
        .with_payload(json!({
            "worker_type": result.worker_type,
            "status": result.status,
            "artifact_uri": result.artifact_uri,
            "metrics": result.metrics,
            "error_code": result.error_code,
            "error_message": result.error_message,
            "retryable": result.retryable,
            "schema_version": result.schema_version,
        }));
        publish_envelope(self.bus.as_ref(), topics::JOB_STATUS, &envelope).await?;

        tracing::info!(
            job_id = %updated.id,
            event_type,
            worker_type = %result.worker_type,
            "worker callback absorbed"
        );
        Ok(Some(event_type))
    }
}
