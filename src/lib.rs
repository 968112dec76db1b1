//! # ReelForge Core
//!
//! Job dispatch and orchestration engine for the ReelForge
//! narrative-to-video pipeline. One submitted story becomes a `Run`; the
//! orchestrator walks it through routing, execution on a worker fleet, and
//! final composition, driven entirely by envelopes on durable topics.
//!
//! ## Architecture
//!
//! - [`events`] - the canonical event envelope every topic message carries
//! - [`models`] - runs, jobs, and their closed lifecycle enums
//! - [`storage`] - repository traits with in-memory and Postgres backends
//! - [`messaging`] - pull-style message bus over in-memory queues or pgmq
//! - [`registry`] - worker node liveness, job routing, skill handlers
//! - [`dispatch`] - node assignment and in-process skill execution
//! - [`orchestration`] - the run state machine and its topic consumers
//! - [`worker`] - the consumption loop worker processes run
//! - [`notify`] - circuit-protected webhook alerting with queued retries
//! - [`web`] - the internal HTTP surface
//!
//! Delivery is at-least-once everywhere; handlers are idempotent through
//! audit-row uniqueness and monotonic progress floors rather than through
//! broker guarantees.

pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod notify;
pub mod orchestration;
pub mod registry;
pub mod skills;
pub mod storage;
pub mod web;
pub mod worker;

pub use config::CoreConfig;
pub use context::AppContext;
pub use error::{CoreError, Result};
pub use events::EventEnvelope;
pub use models::{Job, JobStatus, JobType, Run, RunStage, RunStatus, WorkerPool};
