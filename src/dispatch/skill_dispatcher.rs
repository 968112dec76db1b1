//! In-process job execution through registered skills.
//!
//! The dispatcher claims a domain of job types and skips everything else
//! untouched, so several dispatchers can partition the job space. A
//! claimed job type with no registered skill fails the job with
//! `SKILL-DISPATCH-001`. Skill failures never propagate out of
//! `execute_job`; they land on the job row as structured
//! `{error_code, error_message}`.

use crate::constants::error_codes;
use crate::error::Result;
use crate::models::{Job, JobStatus, JobType};
use crate::registry::{SkillContext, SkillRegistry};
use crate::storage::JobStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

pub struct SkillDispatcher {
    skills: Arc<SkillRegistry>,
    jobs: Arc<dyn JobStore>,
    /// Job types this dispatcher is responsible for. Defaults to the
    /// registry's keys; a wider domain turns missing skills into failed
    /// jobs instead of silent skips.
    domain: Vec<JobType>,
}

impl SkillDispatcher {
    pub fn new(skills: Arc<SkillRegistry>, jobs: Arc<dyn JobStore>) -> Self {
        let domain = skills.job_types();
        Self {
            skills,
            jobs,
            domain,
        }
    }

    pub fn with_domain(mut self, domain: Vec<JobType>) -> Self {
        self.domain = domain;
        self
    }

    /// Execute one job in-process if this dispatcher claims its type.
    /// Returns true when the job was handled (executed or failed).
    pub async fn execute_job(&self, job: &Job) -> Result<bool> {
        if !self.domain.contains(&job.job_type) {
            tracing::debug!(
                job_id = %job.id,
                job_type = ?job.job_type,
                "job type outside dispatcher domain, skipping"
            );
            return Ok(false);
        }
        if !self.skills.owns(job.job_type) {
            let mut failed = job.clone();
            failed.status = JobStatus::Failed;
            failed.attempts += 1;
            failed.result = Some(json!({
                "error_code": error_codes::SKILL_DISPATCH,
                "error_message": format!("no skill registered for {:?}", job.job_type),
                "retryable": false,
            }));
            failed.updated_at = Utc::now();
            self.jobs.update(&failed).await?;
            tracing::error!(
                job_id = %job.id,
                job_type = ?job.job_type,
                error_code = error_codes::SKILL_DISPATCH,
                "claimed job type has no registered skill"
            );
            return Ok(true);
        }
        let skill = self.skills.get(job.job_type)?;

        let mut claimed = job.clone();
        claimed.status = JobStatus::Claimed;
        claimed.locked_by = Some(format!("skill:{}", skill.name()));
        claimed.locked_at = Some(Utc::now());
        claimed.updated_at = Utc::now();
        self.jobs.update(&claimed).await?;

        let ctx = SkillContext {
            run_id: claimed.run_id.clone(),
            job_id: claimed.id.clone(),
            tenant_id: claimed.tenant_id.clone(),
            project_id: claimed.project_id.clone(),
            trace_id: claimed.trace_or_synthetic(),
            correlation_id: claimed.correlation_or_synthetic(),
        };

        match skill.execute(&claimed.payload, &ctx).await {
            Ok(output) => {
                claimed.status = JobStatus::Success;
                claimed.result = Some(output);
                tracing::info!(
                    job_id = %claimed.id,
                    skill = skill.name(),
                    "skill job succeeded"
                );
            }
            Err(err) => {
                claimed.status = JobStatus::Failed;
                claimed.attempts += 1;
                claimed.result = Some(json!({
                    "error_code": err.code,
                    "error_message": err.message,
                    "retryable": true,
                }));
                tracing::error!(
                    job_id = %claimed.id,
                    skill = skill.name(),
                    error_code = %err.code,
                    error_message = %err.message,
                    "skill job failed"
                );
            }
        }
        claimed.locked_by = None;
        claimed.locked_at = None;
        claimed.updated_at = Utc::now();
        self.jobs.update(&claimed).await?;
        Ok(true)
    }

    /// Drain enqueued jobs this dispatcher claims, optionally scoped to
    /// one run. Returns the number of jobs handled.
    pub async fn process_enqueued(&self, run_id: Option<&str>) -> Result<usize> {
        let enqueued = self.jobs.list_by_status(JobStatus::Enqueued, run_id).await?;
        let mut executed = 0;
        for job in &enqueued {
            if self.execute_job(job).await? {
                executed += 1;
            }
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::error_codes;
    use crate::models::JobType;
    use crate::registry::{Skill, SkillError};
    use crate::storage::MemoryJobStore;
    use async_trait::async_trait;
    use serde_json::Value;

    struct RollbackSkill;

    #[async_trait]
    impl Skill for RollbackSkill {
        fn name(&self) -> &str {
            "rollback_kb_version"
        }

        async fn execute(
            &self,
            payload: &Value,
            _ctx: &SkillContext,
        ) -> std::result::Result<Value, SkillError> {
            match payload.get("kb_version").and_then(Value::as_str) {
                Some(version) => Ok(json!({"rolled_back_to": version})),
                None => Err(SkillError::from_message("kb_version missing from payload")),
            }
        }
    }

    fn dispatcher_fixture() -> (SkillDispatcher, Arc<MemoryJobStore>) {
        let mut registry = SkillRegistry::new();
        registry.register(JobType::RollbackKbVersion, Arc::new(RollbackSkill));
        let jobs = Arc::new(MemoryJobStore::new());
        (SkillDispatcher::new(Arc::new(registry), jobs.clone()), jobs)
    }

    #[tokio::test]
    async fn owned_job_executes_and_records_result() {
        let (dispatcher, jobs) = dispatcher_fixture();
        let job = Job::new(
            "job_1",
            "run_1",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({"kb_version": "v41"}),
        );
        jobs.insert(&job).await.unwrap();

        assert!(dispatcher.execute_job(&job).await.unwrap());
        let stored = jobs.get("job_1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Success);
        assert_eq!(stored.result.unwrap()["rolled_back_to"], "v41");
    }

    #[tokio::test]
    async fn non_owned_job_is_untouched() {
        let (dispatcher, jobs) = dispatcher_fixture();
        let job = Job::new("job_2", "run_1", "t1", "p1", JobType::RenderVideo, json!({}));
        jobs.insert(&job).await.unwrap();

        assert!(!dispatcher.execute_job(&job).await.unwrap());
        let stored = jobs.get("job_2").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Enqueued);
        assert!(stored.locked_by.is_none());
    }

    #[tokio::test]
    async fn skill_failure_is_swallowed_into_structured_result() {
        let (dispatcher, jobs) = dispatcher_fixture();
        let job = Job::new(
            "job_3",
            "run_1",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({}),
        );
        jobs.insert(&job).await.unwrap();

        assert!(dispatcher.execute_job(&job).await.unwrap());
        let stored = jobs.get("job_3").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        let result = stored.result.unwrap();
        assert_eq!(result["error_code"], error_codes::SKILL_EXEC);
        assert_eq!(result["retryable"], true);
    }

    #[tokio::test]
    async fn claimed_type_without_skill_fails_with_dispatch_code() {
        let jobs = Arc::new(MemoryJobStore::new());
        let dispatcher = SkillDispatcher::new(Arc::new(SkillRegistry::new()), jobs.clone())
            .with_domain(vec![JobType::RollbackKbVersion]);
        let job = Job::new(
            "job_1",
            "run_1",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({"kb_version": "v41"}),
        );
        jobs.insert(&job).await.unwrap();

        assert!(dispatcher.execute_job(&job).await.unwrap());
        let stored = jobs.get("job_1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let result = stored.result.unwrap();
        assert_eq!(result["error_code"], error_codes::SKILL_DISPATCH);
        assert_eq!(result["retryable"], false);
    }

    #[tokio::test]
    async fn process_enqueued_scopes_to_run_and_counts_owned_only() {
        let (dispatcher, jobs) = dispatcher_fixture();
        let owned = Job::new(
            "job_a",
            "run_1",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({"kb_version": "v1"}),
        );
        let foreign = Job::new("job_b", "run_1", "t1", "p1", JobType::SynthAudio, json!({}));
        let other_run = Job::new(
            "job_c",
            "run_2",
            "t1",
            "p1",
            JobType::RollbackKbVersion,
            json!({"kb_version": "v2"}),
        );
        for job in [&owned, &foreign, &other_run] {
            jobs.insert(job).await.unwrap();
        }

        let executed = dispatcher.process_enqueued(Some("run_1")).await.unwrap();
        assert_eq!(executed, 1);
        assert_eq!(
            jobs.get("job_c").await.unwrap().unwrap().status,
            JobStatus::Enqueued
        );
    }
}
