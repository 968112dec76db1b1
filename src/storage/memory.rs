//! In-memory stores used by tests and consumer-disabled processes.

use crate::error::Result;
use crate::models::{AuditEvent, Job, JobStatus, Run};
use crate::storage::{EventStore, InsertOutcome, JobStore, RunStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryRunStore {
    runs: DashMap<String, Run>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert(&self, run: &Run) -> Result<()> {
        self.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn update(&self, run: &Run) -> Result<()> {
        self.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, Job>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id).map(|j| j.value().clone()))
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: JobStatus, run_id: Option<&str>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| entry.status == status)
            .filter(|entry| run_id.map_or(true, |rid| entry.run_id == rid))
            .map(|entry| entry.value().clone())
            .collect();
        // Stable order for batch processing: oldest first, priority wins.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn counts_by_status(&self) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for entry in self.jobs.iter() {
            let key = serde_json::to_value(entry.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    by_event_id: DashMap<String, AuditEvent>,
    by_idempotency: DashMap<(String, String), String>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &AuditEvent) -> Result<InsertOutcome> {
        let idem_key = (event.idempotency_key.clone(), event.event_type.clone());
        if self.by_event_id.contains_key(&event.event_id)
            || self.by_idempotency.contains_key(&idem_key)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        self.by_idempotency.insert(idem_key, event.event_id.clone());
        self.by_event_id
            .insert(event.event_id.clone(), event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_for_run(&self, run_id: &str) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .by_event_id
            .iter()
            .filter(|entry| entry.run_id.as_deref() == Some(run_id))
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobType;
    use chrono::Utc;
    use serde_json::json;

    fn audit_event(event_id: &str, idem: &str, event_type: &str) -> AuditEvent {
        AuditEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            producer: "test".to_string(),
            tenant_id: "t1".to_string(),
            project_id: "p1".to_string(),
            run_id: Some("run_1".to_string()),
            job_id: None,
            trace_id: "tr".to_string(),
            correlation_id: "cr".to_string(),
            idempotency_key: idem.to_string(),
            occurred_at: Utc::now(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn duplicate_event_id_is_detected() {
        let store = MemoryEventStore::new();
        let event = audit_event("evt_1", "idem_a", "job.succeeded");

        assert_eq!(store.insert(&event).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&event).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.list_for_run("run_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_same_type_is_detected() {
        let store = MemoryEventStore::new();
        let first = audit_event("evt_1", "idem_a", "job.succeeded");
        let second = audit_event("evt_2", "idem_a", "job.succeeded");
        let other_type = audit_event("evt_3", "idem_a", "job.failed");

        assert_eq!(store.insert(&first).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert(&second).await.unwrap(), InsertOutcome::Duplicate);
        // Same key, different event type: distinct logical event.
        assert_eq!(
            store.insert(&other_type).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn list_by_status_scopes_to_run() {
        let store = MemoryJobStore::new();
        let mut a = Job::new("job_a", "run_1", "t1", "p1", JobType::RenderVideo, json!({}));
        let b = Job::new("job_b", "run_2", "t1", "p1", JobType::RenderVideo, json!({}));
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();

        let enqueued = store
            .list_by_status(JobStatus::Enqueued, Some("run_1"))
            .await
            .unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].id, "job_a");

        a.status = JobStatus::Success;
        store.update(&a).await.unwrap();
        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.get("success"), Some(&1));
        assert_eq!(counts.get("enqueued"), Some(&1));
    }
}
