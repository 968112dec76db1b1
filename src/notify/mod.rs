//! # Outbound Notifications
//!
//! Webhook alert delivery guarded by a per-(tenant, project) circuit
//! breaker, with an independent exponential-backoff retry queue on the
//! alert topic.

pub mod alert;
pub mod circuit;

pub use alert::{
    AlertMessage, AlertNotifier, AlertTransport, DeliveryError, NotifyOutcome, NotifySettings,
    NotifySettingsSource, WebhookTransport,
};
pub use circuit::CircuitBreakerRegistry;
