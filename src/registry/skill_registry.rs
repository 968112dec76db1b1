//! In-process skill handlers.
//!
//! Skills are the single-process execution path: instead of dispatching a
//! job to a remote worker pool, a registered [`Skill`] runs it inline. The
//! registry maps job types to shared handler instances built once at
//! startup, so dispatchers share singletons instead of constructing
//! handlers per job.

use crate::constants::error_codes;
use crate::error::{CoreError, Result};
use crate::models::JobType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Execution context handed to a skill alongside the job payload.
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub run_id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub trace_id: String,
    pub correlation_id: String,
}

/// Structured skill failure. `code` rides the job's result envelope as
/// `error_code`.
#[derive(Debug, Clone)]
pub struct SkillError {
    pub code: String,
    pub message: String,
}

impl SkillError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Parse a failure message of the form `CODE-123: detail` into a
    /// structured error. Messages without a code prefix get the generic
    /// skill execution code.
    pub fn from_message(message: &str) -> Self {
        if let Some((code, detail)) = message.split_once(": ") {
            let looks_like_code = !code.is_empty()
                && code.len() <= 32
                && code
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
                && code.contains('-');
            if looks_like_code {
                return Self::new(code, detail);
            }
        }
        Self::new(error_codes::SKILL_EXEC, message)
    }
}

impl std::fmt::Display for SkillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        payload: &Value,
        ctx: &SkillContext,
    ) -> std::result::Result<Value, SkillError>;
}

/// Startup-built map from job type to handler. Handlers are `Arc`-shared;
/// a dispatcher resolves the same instance for every job of a type.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<JobType, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: JobType, skill: Arc<dyn Skill>) {
        self.skills.insert(job_type, skill);
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn Skill>> {
        self.skills
            .get(&job_type)
            .cloned()
            .ok_or_else(|| CoreError::UnknownSkill(format!("{job_type:?}")))
    }

    /// Whether this registry owns the job type. Dispatchers use this to
    /// skip jobs belonging to other dispatchers without touching them.
    pub fn owns(&self, job_type: JobType) -> bool {
        self.skills.contains_key(&job_type)
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.skills.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSkill;

    #[async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            payload: &Value,
            _ctx: &SkillContext,
        ) -> std::result::Result<Value, SkillError> {
            Ok(payload.clone())
        }
    }

    #[test]
    fn registry_resolves_shared_instance() {
        let mut registry = SkillRegistry::new();
        registry.register(JobType::IngestStory, Arc::new(EchoSkill));

        assert!(registry.owns(JobType::IngestStory));
        assert!(!registry.owns(JobType::RenderVideo));
        let a = registry.get(JobType::IngestStory).unwrap();
        let b = registry.get(JobType::IngestStory).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            registry.get(JobType::RenderVideo),
            Err(CoreError::UnknownSkill(_))
        ));
    }

    #[test]
    fn error_code_extraction() {
        let err = SkillError::from_message("KB-ROLLBACK-001: version missing");
        assert_eq!(err.code, "KB-ROLLBACK-001");
        assert_eq!(err.message, "version missing");

        let plain = SkillError::from_message("something broke: badly");
        assert_eq!(plain.code, error_codes::SKILL_EXEC);
        assert_eq!(plain.message, "something broke: badly");
    }
}
