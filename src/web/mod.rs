//! # Internal HTTP Surface
//!
//! Small axum app for collaborator services and operators: enqueue a job,
//! deliver a worker result callback, read queue telemetry. This is not a
//! product API; there is no auth or CRUD here.

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/internal/dispatch", post(handlers::dispatch_job))
        .route("/internal/callbacks/result", post(handlers::worker_result))
        .route("/internal/telemetry/queue", get(handlers::queue_telemetry))
        .with_state(state)
}
