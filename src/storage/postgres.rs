//! Postgres-backed stores.
//!
//! Queries are plain `sqlx::query` with manual row mapping so the crate
//! builds without a live database. Enum-like columns are stored as text
//! using the wire names; `workflow_events` carries the unique constraints
//! that turn redelivery into [`InsertOutcome::Duplicate`].

use crate::error::{CoreError, Result};
use crate::models::{AuditEvent, Job, JobStatus, JobType, Run, RunStage, RunStatus};
use crate::storage::{EventStore, InsertOutcome, JobStore, RunStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

fn wire_name<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Err(CoreError::Storage(format!(
            "expected string wire name, got {other}"
        ))),
    }
}

fn from_wire<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(CoreError::Serialization)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

fn run_from_row(row: &PgRow) -> Result<Run> {
    Ok(Run {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
        stage: from_wire::<RunStage>(row.try_get::<String, _>("stage")?.as_str())?,
        status: from_wire::<RunStatus>(row.try_get::<String, _>("status")?.as_str())?,
        progress: row.try_get("progress")?,
        error_code: row.try_get("error_code")?,
        error_message: row.try_get("error_message")?,
        final_artifact_uri: row.try_get("final_artifact_uri")?,
        trace_id: row.try_get("trace_id")?,
        correlation_id: row.try_get("correlation_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    Ok(Job {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
        job_type: from_wire::<JobType>(row.try_get::<String, _>("job_type")?.as_str())?,
        stage: from_wire::<RunStage>(row.try_get::<String, _>("stage")?.as_str())?,
        status: from_wire::<JobStatus>(row.try_get::<String, _>("status")?.as_str())?,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        locked_by: row.try_get("locked_by")?,
        locked_at: row.try_get("locked_at")?,
        idempotency_key: row.try_get("idempotency_key")?,
        attempts: row.try_get("attempts")?,
        trace_id: row.try_get("trace_id")?,
        correlation_id: row.try_get("correlation_id")?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<AuditEvent> {
    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        producer: row.try_get("producer")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
        run_id: row.try_get("run_id")?,
        job_id: row.try_get("job_id")?,
        trace_id: row.try_get("trace_id")?,
        correlation_id: row.try_get("correlation_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        occurred_at: row.try_get("occurred_at")?,
        payload: row.try_get("payload")?,
    })
}

#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, tenant_id, project_id, stage, status, progress, \
             error_code, error_message, final_artifact_uri, trace_id, correlation_id, \
             idempotency_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&run.id)
        .bind(&run.tenant_id)
        .bind(&run.project_id)
        .bind(wire_name(&run.stage)?)
        .bind(wire_name(&run.status)?)
        .bind(run.progress)
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(&run.final_artifact_uri)
        .bind(&run.trace_id)
        .bind(&run.correlation_id)
        .bind(&run.idempotency_key)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn update(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET stage = $2, status = $3, progress = $4, error_code = $5, \
             error_message = $6, final_artifact_uri = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(&run.id)
        .bind(wire_name(&run.stage)?)
        .bind(wire_name(&run.status)?)
        .bind(run.progress)
        .bind(&run.error_code)
        .bind(&run.error_message)
        .bind(&run.final_artifact_uri)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, run_id, tenant_id, project_id, job_type, stage, status, \
             payload, priority, locked_by, locked_at, idempotency_key, attempts, trace_id, \
             correlation_id, result, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&job.id)
        .bind(&job.run_id)
        .bind(&job.tenant_id)
        .bind(&job.project_id)
        .bind(wire_name(&job.job_type)?)
        .bind(wire_name(&job.stage)?)
        .bind(wire_name(&job.status)?)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(&job.idempotency_key)
        .bind(job.attempts)
        .bind(&job.trace_id)
        .bind(&job.correlation_id)
        .bind(&job.result)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = $2, stage = $3, locked_by = $4, locked_at = $5, \
             attempts = $6, result = $7, payload = $8, updated_at = $9 WHERE id = $1",
        )
        .bind(&job.id)
        .bind(wire_name(&job.status)?)
        .bind(wire_name(&job.stage)?)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.attempts)
        .bind(&job.result)
        .bind(&job.payload)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus, run_id: Option<&str>) -> Result<Vec<Job>> {
        let rows = match run_id {
            Some(rid) => {
                sqlx::query(
                    "SELECT * FROM jobs WHERE status = $1 AND run_id = $2 \
                     ORDER BY priority DESC, created_at ASC",
                )
                .bind(wire_name(&status)?)
                .bind(rid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM jobs WHERE status = $1 ORDER BY priority DESC, created_at ASC",
                )
                .bind(wire_name(&status)?)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(job_from_row).collect()
    }

    async fn counts_by_status(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in &rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count);
        }
        Ok(counts)
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert(&self, event: &AuditEvent) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO workflow_events (event_id, event_type, producer, tenant_id, \
             project_id, run_id, job_id, trace_id, correlation_id, idempotency_key, \
             occurred_at, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.producer)
        .bind(&event.tenant_id)
        .bind(&event.project_id)
        .bind(&event.run_id)
        .bind(&event.job_id)
        .bind(&event.trace_id)
        .bind(&event.correlation_id)
        .bind(&event.idempotency_key)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_for_run(&self, run_id: &str) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_events WHERE run_id = $1 ORDER BY occurred_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }
}
