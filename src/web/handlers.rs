//! Request handlers for the internal surface.

use crate::constants::event_types;
use crate::error::CoreError;
use crate::events::EventEnvelope;
use crate::messaging::{publish_envelope, topics, DispatchRequest, DispatchResponse, WorkerResult};
use crate::models::Job;
use crate::web::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::UnroutableJobType(_) | CoreError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            CoreError::NoAvailableNode { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({"error": self.0.to_string()}));
        (status, body).into_response()
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Accept a job for asynchronous dispatch. The job row is created
/// enqueued and a `job.created` envelope lands on the dispatch topic; the
/// dispatch consumer assigns a node later, hence 202.
pub async fn dispatch_job(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), ApiError> {
    let mut job = Job::new(
        &request.job_id,
        &request.run_id,
        &request.tenant_id,
        &request.project_id,
        request.job_type,
        request.payload.clone(),
    );
    job.idempotency_key = request.idempotency_key.clone();
    job.trace_id = Some(request.trace_id.clone());
    job.correlation_id = Some(request.correlation_id.clone());
    state.jobs.insert(&job).await?;

    // The dispatch consumer and the worker loops both require the routed
    // pool on the envelope, so resolve it up front and reject unroutable
    // types before anything is queued.
    let worker_type = state.routing.resolve(request.job_type)?;
    let fallback_chain: Vec<String> = if request.fallback_chain.is_empty() {
        state
            .routing
            .fallback_chain(request.job_type)
            .iter()
            .map(|p| p.as_str().to_string())
            .collect()
    } else {
        request.fallback_chain.clone()
    };

    let envelope = EventEnvelope::new(
        event_types::JOB_CREATED,
        "dispatch-api",
        &request.tenant_id,
        &request.project_id,
        format!("{}:{}", request.idempotency_key, event_types::JOB_CREATED),
    )
    .with_run(&request.run_id)
    .with_job(&job.id)
    .with_tracing(&request.trace_id, &request.correlation_id)
    .with_payload(json!({
        "job_type": request.job_type,
        "worker_type": worker_type.as_str(),
        "timeout_ms": request.timeout_ms,
        "fallback_chain": fallback_chain,
        "payload": request.payload,
    }));
    publish_envelope(state.bus.as_ref(), topics::JOB_DISPATCH, &envelope).await?;

    tracing::info!(job_id = %job.id, run_id = %job.run_id, "dispatch accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse {
            job_id: job.id,
            status: "accepted".to_string(),
        }),
    ))
}

/// Absorb a worker result callback. Always 202: unknown jobs are logged
/// and dropped inside the hub, callers must not retry on them.
pub async fn worker_result(
    State(state): State<AppState>,
    Json(result): Json<WorkerResult>,
) -> Result<StatusCode, ApiError> {
    state.hub.handle_callback(&result).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Queue depths and job counts, for dashboards and debugging.
pub async fn queue_telemetry(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job_counts = state.jobs.counts_by_status().await?;
    let mut depths = serde_json::Map::new();
    for topic in topics::ALL {
        depths.insert(topic.to_string(), json!(state.bus.depth(topic).await?));
    }
    for pool in crate::models::WorkerPool::ALL {
        let topic = topics::pool_dispatch(pool.as_str());
        depths.insert(topic.clone(), json!(state.bus.depth(&topic).await?));
    }
    let nodes: Vec<_> = state
        .nodes
        .snapshot()
        .into_iter()
        .map(|n| {
            json!({
                "node_id": n.node_id,
                "pool": n.pool.as_str(),
                "capacity": n.capacity,
                "gpu_tier": n.gpu_tier,
                "current_load": n.current_load,
            })
        })
        .collect();
    Ok(Json(json!({
        "jobs": job_counts,
        "topics": depths,
        "nodes": nodes,
    })))
}
