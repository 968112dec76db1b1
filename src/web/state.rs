//! Shared handler state.

use crate::dispatch::DispatchHub;
use crate::messaging::MessageBus;
use crate::registry::{NodeRegistry, RoutingTable};
use crate::storage::JobStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub bus: Arc<dyn MessageBus>,
    pub hub: Arc<DispatchHub>,
    pub nodes: Arc<NodeRegistry>,
    pub routing: Arc<RoutingTable>,
}
