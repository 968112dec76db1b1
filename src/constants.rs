//! # System Constants
//!
//! Event types, stable error codes, and operational defaults shared by the
//! dispatch hub, orchestrator, workers, and notification layer.
//!
//! Error codes are wire-stable across the polyglot worker fleet; do not
//! rename them without coordinating a fleet-wide rollout.

/// Canonical event types carried in [`crate::events::EventEnvelope::event_type`].
pub mod event_types {
    pub const TASK_SUBMITTED: &str = "task.submitted";

    // Job lifecycle
    pub const JOB_CREATED: &str = "job.created";
    pub const JOB_CLAIMED: &str = "job.claimed";
    pub const JOB_SUCCEEDED: &str = "job.succeeded";
    pub const JOB_FAILED: &str = "job.failed";

    // Composition lifecycle
    pub const COMPOSE_STARTED: &str = "compose.started";
    pub const COMPOSE_COMPLETED: &str = "compose.completed";
    pub const COMPOSE_FAILED: &str = "compose.failed";

    // Orchestrator fanout
    pub const RUN_STAGE_CHANGED: &str = "run.stage.changed";

    // Skill-emitted events with compensation semantics
    pub const KB_VERSION_ROLLED_BACK: &str = "kb.version.rolled_back";

    // Notification retry queue payloads
    pub const ALERT_NOTIFY_RETRY: &str = "alert.notify.retry";
}

/// Stable error codes surfaced on runs and jobs.
pub mod error_codes {
    /// Worker-side execution failure with no more specific code.
    pub const WORKER_EXEC: &str = "WORKER-EXEC-002";
    /// Final composition (ffmpeg) failure.
    pub const COMPOSE_FFMPEG: &str = "COMPOSE-FFMPEG-001";
    /// In-process skill execution failure with no embedded code.
    pub const SKILL_EXEC: &str = "SKILL-EXEC-001";
    /// A skill job type reached a dispatcher that cannot map it.
    pub const SKILL_DISPATCH: &str = "SKILL-DISPATCH-001";
}

/// Operational defaults. Each is overridable through [`crate::config::CoreConfig`].
pub mod defaults {
    /// Nodes silent longer than this are treated as dead.
    pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
    /// Worker execution timeout carried on `job.created`.
    pub const DISPATCH_TIMEOUT_MS: u64 = 60_000;
    /// Consumer poll cadence against the message bus.
    pub const POLL_INTERVAL_MS: u64 = 200;

    /// Consecutive notification failures that open a scope's circuit.
    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 3;
    /// How long an opened circuit rejects sends.
    pub const CIRCUIT_OPEN_SECS: u64 = 60;
    /// Fixed requeue delay while a circuit is open.
    pub const CIRCUIT_OPEN_RETRY_DELAY_MS: u64 = 2_000;
    /// Base of the exponential notification backoff (`base * 2^attempt`).
    pub const RETRY_BASE_DELAY_MS: u64 = 1_000;
    /// Cap applied to the exponential backoff.
    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;
    /// Retry budget for a single notification.
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;

    /// Progress floor applied when a job is claimed.
    pub const PROGRESS_CLAIMED: i32 = 15;
    /// Progress floor applied when a job succeeds.
    pub const PROGRESS_JOB_SUCCEEDED: i32 = 70;
    /// Progress on run completion.
    pub const PROGRESS_COMPLETE: i32 = 100;
}
