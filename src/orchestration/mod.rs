//! # Orchestration
//!
//! The run state machine ([`service::OrchestratorService`]) and the
//! background consumer loops ([`consumers`]) that feed it from the durable
//! topics.

pub mod consumers;
pub mod service;

pub use service::OrchestratorService;
