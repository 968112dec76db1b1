//! # Messaging Layer
//!
//! Durable-topic abstraction used by every producer and consumer in the
//! system. The bus trait is pull-style (publish / poll / ack) so the same
//! consumer loops run against the in-memory bus in tests and pgmq-backed
//! queues in deployment.

pub mod bus;
pub mod message;
pub mod pgmq_bus;
pub mod topics;

pub use bus::{publish_envelope, InMemoryBus, MessageBus, QueuedMessage};
pub use message::{AlertRetryMessage, DispatchRequest, DispatchResponse, WorkerResult};
pub use pgmq_bus::PgmqBus;
