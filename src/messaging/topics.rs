//! Durable topic names.
//!
//! `job.dispatch` carries `job.created` envelopes and is consumed only by
//! the dispatch hub; assigned work is republished onto a per-pool queue
//! ([`pool_dispatch`]) owned by that pool's workers. `job.status` carries
//! the lifecycle envelopes; `worker.detail` carries raw worker results
//! (not envelopes); `alert.events` carries notification retry payloads.

pub const TASK_SUBMITTED: &str = "task.submitted";
pub const JOB_DISPATCH: &str = "job.dispatch";
pub const JOB_STATUS: &str = "job.status";
pub const WORKER_DETAIL: &str = "worker.detail";
pub const COMPOSE_DISPATCH: &str = "compose.dispatch";
pub const COMPOSE_STATUS: &str = "compose.status";
pub const SKILL_EVENTS: &str = "skill.events";
pub const ALERT_EVENTS: &str = "alert.events";

/// Dead-letter topic for dispatch messages that failed processing.
pub const JOB_DISPATCH_DLQ: &str = "job.dispatch.dlq";
/// Retry topic for worker callbacks that failed processing.
pub const WORKER_CALLBACK_RETRY: &str = "worker.callback.retry";

/// Per-pool dispatch queue carrying node-assigned work for one worker
/// type, e.g. `job.dispatch.worker-video`. Each pool's workers are the
/// sole consumers of their queue, so no consumer ever sees another
/// pool's messages.
pub fn pool_dispatch(worker_type: &str) -> String {
    format!("{JOB_DISPATCH}.{worker_type}")
}

/// All fixed topics a full deployment provisions at startup; the per-pool
/// dispatch queues are provisioned alongside these.
pub const ALL: [&str; 10] = [
    TASK_SUBMITTED,
    JOB_DISPATCH,
    JOB_STATUS,
    WORKER_DETAIL,
    COMPOSE_DISPATCH,
    COMPOSE_STATUS,
    SKILL_EVENTS,
    ALERT_EVENTS,
    JOB_DISPATCH_DLQ,
    WORKER_CALLBACK_RETRY,
];
