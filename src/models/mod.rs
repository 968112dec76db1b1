//! # Core Data Model
//!
//! Runs, jobs, and the closed enums that describe their lifecycle. A `Run`
//! is one end-to-end generation request; a `Job` is one schedulable unit of
//! work inside it. Both live in the relational store behind
//! [`crate::storage`] traits; worker nodes are deliberately absent here
//! because they are ephemeral registry state (see
//! [`crate::registry::node_registry`]).

use crate::constants::defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline phase of a run. Advancement is monotonic; `Observe` is reached
/// only after successful composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Ingest,
    Route,
    Plan,
    Entity,
    Execute,
    Compose,
    Observe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Enqueued,
    Claimed,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// Closed set of schedulable work. Routing and skill resolution switch over
/// this enum, so an unroutable type is a startup-visible configuration gap
/// rather than a runtime lookup surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    IngestStory,
    RouteLanguage,
    PlanSceneShots,
    ExtractEntities,
    PlanAudioAssets,
    CanonicalizeEntities,
    MatchAssets,
    PlanVisualRender,
    PlanPrompt,
    EvaluateQuality,
    RollbackKbVersion,
    SynthAudio,
    RenderVideo,
    RenderLipsync,
    ComposeFinal,
}

/// Worker pool responsible for a category of job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerPool {
    Llm,
    Audio,
    Video,
    Lipsync,
    Composer,
}

impl WorkerPool {
    pub const ALL: [WorkerPool; 5] = [
        WorkerPool::Llm,
        WorkerPool::Audio,
        WorkerPool::Video,
        WorkerPool::Lipsync,
        WorkerPool::Composer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPool::Llm => "worker-llm",
            WorkerPool::Audio => "worker-audio",
            WorkerPool::Video => "worker-video",
            WorkerPool::Lipsync => "worker-lipsync",
            WorkerPool::Composer => "worker-composer",
        }
    }
}

impl fmt::Display for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerPool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker-llm" => Ok(WorkerPool::Llm),
            "worker-audio" => Ok(WorkerPool::Audio),
            "worker-video" => Ok(WorkerPool::Video),
            "worker-lipsync" => Ok(WorkerPool::Lipsync),
            "worker-composer" => Ok(WorkerPool::Composer),
            other => Err(format!("unknown worker pool '{other}'")),
        }
    }
}

/// One end-to-end generation request. Owned by the orchestrator; mutated
/// only through its stage-transition handlers. Terminal runs are never
/// reopened, regeneration creates a fresh dispatch instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub stage: RunStage,
    pub status: RunStatus,
    pub progress: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub final_artifact_uri: Option<String>,
    pub trace_id: String,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        trace_id: impl Into<String>,
        correlation_id: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            stage: RunStage::Ingest,
            status: RunStatus::Queued,
            progress: 0,
            error_code: None,
            error_message: None,
            final_artifact_uri: None,
            trace_id: trace_id.into(),
            correlation_id: correlation_id.into(),
            idempotency_key: idempotency_key.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mint_id() -> String {
        format!("run_{}", Uuid::new_v4().simple())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raise the progress floor. Progress never decreases, which makes the
    /// stage handlers safe under at-least-once redelivery.
    pub fn raise_progress(&mut self, floor: i32) {
        if floor > self.progress {
            self.progress = floor.min(defaults::PROGRESS_COMPLETE);
        }
    }

    pub fn record_failure(&mut self, error_code: impl Into<String>, error_message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error_code = Some(error_code.into());
        self.error_message = Some(error_message.into());
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One schedulable unit of work within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub run_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub job_type: JobType,
    pub stage: RunStage,
    pub status: JobStatus,
    pub payload: Value,
    pub priority: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub idempotency_key: String,
    pub attempts: i32,
    pub trace_id: Option<String>,
    pub correlation_id: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        tenant_id: impl Into<String>,
        project_id: impl Into<String>,
        job_type: JobType,
        payload: Value,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            idempotency_key: format!("idem_{id}"),
            id,
            run_id: run_id.into(),
            tenant_id: tenant_id.into(),
            project_id: project_id.into(),
            job_type,
            stage: RunStage::Execute,
            status: JobStatus::Enqueued,
            payload,
            priority: 0,
            locked_by: None,
            locked_at: None,
            attempts: 0,
            trace_id: None,
            correlation_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mint_id() -> String {
        format!("job_{}", Uuid::new_v4().simple())
    }

    /// Trace identifier, falling back to a deterministic synthetic one so
    /// downstream consumers can always correlate.
    pub fn trace_or_synthetic(&self) -> String {
        self.trace_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("tr_{}", self.id))
    }

    pub fn correlation_or_synthetic(&self) -> String {
        self.correlation_id
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("cr_{}", self.id))
    }
}

/// Immutable audit row persisted for every consumed envelope. The unique
/// keys (`event_id`, and `idempotency_key` + `event_type`) are what make
/// duplicate delivery detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: String,
    pub producer: String,
    pub tenant_id: String,
    pub project_id: String,
    pub run_id: Option<String>,
    pub job_id: Option<String>,
    pub trace_id: String,
    pub correlation_id: String,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}
