//! Job type to worker pool routing.
//!
//! The table is built explicitly at startup over the closed [`JobType`]
//! enum. A missing route is a configuration bug surfaced as
//! [`CoreError::UnroutableJobType`], never a silent default.

use crate::error::{CoreError, Result};
use crate::models::{JobType, WorkerPool};
use std::collections::HashMap;

pub struct RoutingTable {
    routes: HashMap<JobType, WorkerPool>,
    fallbacks: HashMap<JobType, Vec<WorkerPool>>,
}

impl RoutingTable {
    /// Empty table, for tests that exercise the unroutable path.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            fallbacks: HashMap::new(),
        }
    }

    /// The production routing map for the narrative-to-video pipeline.
    pub fn with_default_routes() -> Self {
        let mut table = Self::empty();
        for job_type in [
            JobType::IngestStory,
            JobType::RouteLanguage,
            JobType::PlanSceneShots,
            JobType::ExtractEntities,
            JobType::PlanAudioAssets,
            JobType::CanonicalizeEntities,
            JobType::MatchAssets,
            JobType::PlanVisualRender,
            JobType::PlanPrompt,
            JobType::EvaluateQuality,
            JobType::RollbackKbVersion,
        ] {
            table.add_route(job_type, WorkerPool::Llm);
        }
        table.add_route(JobType::SynthAudio, WorkerPool::Audio);
        table.add_route(JobType::RenderVideo, WorkerPool::Video);
        table.add_route(JobType::RenderLipsync, WorkerPool::Lipsync);
        table.add_route(JobType::ComposeFinal, WorkerPool::Composer);
        table
    }

    pub fn add_route(&mut self, job_type: JobType, pool: WorkerPool) {
        self.routes.insert(job_type, pool);
    }

    pub fn add_fallback(&mut self, job_type: JobType, pools: Vec<WorkerPool>) {
        self.fallbacks.insert(job_type, pools);
    }

    pub fn resolve(&self, job_type: JobType) -> Result<WorkerPool> {
        self.routes.get(&job_type).copied().ok_or_else(|| {
            CoreError::UnroutableJobType(format!("{job_type:?}"))
        })
    }

    /// Alternate pools to try when the primary pool is saturated, in order.
    pub fn fallback_chain(&self, job_type: JobType) -> Vec<WorkerPool> {
        self.fallbacks.get(&job_type).cloned().unwrap_or_default()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::with_default_routes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routes_cover_every_job_type() {
        let table = RoutingTable::with_default_routes();
        assert_eq!(table.resolve(JobType::SynthAudio).unwrap(), WorkerPool::Audio);
        assert_eq!(table.resolve(JobType::RenderVideo).unwrap(), WorkerPool::Video);
        assert_eq!(table.resolve(JobType::RenderLipsync).unwrap(), WorkerPool::Lipsync);
        assert_eq!(table.resolve(JobType::ComposeFinal).unwrap(), WorkerPool::Composer);
        assert_eq!(table.resolve(JobType::IngestStory).unwrap(), WorkerPool::Llm);
        assert_eq!(table.resolve(JobType::RollbackKbVersion).unwrap(), WorkerPool::Llm);
    }

    #[test]
    fn missing_route_is_an_error() {
        let table = RoutingTable::empty();
        let err = table.resolve(JobType::RenderVideo).unwrap_err();
        assert!(matches!(err, CoreError::UnroutableJobType(_)));
    }
}
