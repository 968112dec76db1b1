//! # Repository Interfaces
//!
//! The orchestrator, hub, and dispatchers talk to the relational store
//! through these traits. Two implementations ship: DashMap-backed in-memory
//! stores for tests and single-process mode, and plain-sqlx Postgres stores
//! for deployment.
//!
//! `EventStore::insert` is the duplicate-delivery guard: the audit row's
//! uniqueness constraints (on `event_id` and on `idempotency_key` +
//! `event_type`) turn redelivered envelopes into [`InsertOutcome::Duplicate`]
//! instead of errors.

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{AuditEvent, Job, JobStatus, Run};
use async_trait::async_trait;
use std::collections::HashMap;

pub use memory::{MemoryEventStore, MemoryJobStore, MemoryRunStore};
pub use postgres::{PgEventStore, PgJobStore, PgRunStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The row already exists; the envelope was delivered before.
    Duplicate,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &Run) -> Result<()>;
    async fn get(&self, run_id: &str) -> Result<Option<Run>>;
    async fn update(&self, run: &Run) -> Result<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;
    async fn update(&self, job: &Job) -> Result<()>;
    async fn list_by_status(&self, status: JobStatus, run_id: Option<&str>) -> Result<Vec<Job>>;
    /// Job counts keyed by status wire name, for queue telemetry.
    async fn counts_by_status(&self) -> Result<HashMap<String, i64>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: &AuditEvent) -> Result<InsertOutcome>;
    async fn list_for_run(&self, run_id: &str) -> Result<Vec<AuditEvent>>;
}
