//! Event envelope shared across every durable topic.

pub mod envelope;

pub use envelope::EventEnvelope;
