//! Structured error types for the dispatch and orchestration core.
//!
//! The taxonomy follows the operational failure classes: routing errors are
//! configuration bugs and fatal, capacity errors are retryable by requeueing,
//! duplicate deliveries are not errors at all (see [`crate::storage`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No worker pool is mapped for a job type. Indicates a configuration
    /// bug; never retried.
    #[error("no worker pool routes job type '{0}'")]
    UnroutableJobType(String),

    /// A pool has no live node with spare capacity. The job has been set
    /// back to enqueued; callers decide when to re-dispatch.
    #[error("no available node in pool '{pool}'")]
    NoAvailableNode { pool: String },

    /// A job type was dispatched in-process but no skill is registered for it.
    #[error("no skill registered for job type '{0}'")]
    UnknownSkill(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
