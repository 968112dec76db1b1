//! Process composition root.
//!
//! All shared components are constructed here, explicitly, and handed down
//! by `Arc`. There are no process-global singletons: a test builds its own
//! context the same way a binary does.

use crate::config::CoreConfig;
use crate::dispatch::{DispatchHub, SkillDispatcher};
use crate::error::Result;
use crate::messaging::{InMemoryBus, MessageBus, PgmqBus};
use crate::notify::{AlertNotifier, CircuitBreakerRegistry, WebhookTransport};
use crate::orchestration::OrchestratorService;
use crate::registry::{NodeRegistry, RoutingTable};
use crate::storage::{
    EventStore, JobStore, MemoryEventStore, MemoryJobStore, MemoryRunStore, PgEventStore,
    PgJobStore, PgRunStore, RunStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub struct AppContext {
    pub config: CoreConfig,
    pub runs: Arc<dyn RunStore>,
    pub jobs: Arc<dyn JobStore>,
    pub events: Arc<dyn EventStore>,
    pub bus: Arc<dyn MessageBus>,
    pub nodes: Arc<NodeRegistry>,
    pub routing: Arc<RoutingTable>,
    pub hub: Arc<DispatchHub>,
    pub orchestrator: Arc<OrchestratorService>,
    pub skill_dispatcher: Arc<SkillDispatcher>,
    pub notifier: Option<Arc<AlertNotifier>>,
}

impl AppContext {
    /// Fully in-memory context: DashMap stores and the in-memory bus.
    pub fn in_memory(config: CoreConfig) -> Self {
        let runs: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let events: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
        Self::assemble(config, runs, jobs, events, bus)
    }

    /// Postgres-backed context: sqlx stores and the pgmq bus share one
    /// connection pool.
    pub async fn postgres(config: CoreConfig, database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let bus = PgmqBus::new_with_pool(pool.clone()).await;
        bus.ensure_topics().await?;

        let runs: Arc<dyn RunStore> = Arc::new(PgRunStore::new(pool.clone()));
        let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
        let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool));
        let bus: Arc<dyn MessageBus> = Arc::new(bus);
        Ok(Self::assemble(config, runs, jobs, events, bus))
    }

    /// Pick the backend from the config: `DATABASE_URL` set means Postgres.
    pub async fn from_config(config: CoreConfig) -> Result<Self> {
        match config.database_url.clone() {
            Some(url) => Self::postgres(config, &url).await,
            None => Ok(Self::in_memory(config)),
        }
    }

    fn assemble(
        config: CoreConfig,
        runs: Arc<dyn RunStore>,
        jobs: Arc<dyn JobStore>,
        events: Arc<dyn EventStore>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let routing = Arc::new(RoutingTable::with_default_routes());
        let nodes = Arc::new(NodeRegistry::new(config.heartbeat_timeout_secs));
        let hub = Arc::new(DispatchHub::new(
            routing.clone(),
            nodes.clone(),
            jobs.clone(),
            bus.clone(),
        ));
        let orchestrator = Arc::new(OrchestratorService::new(
            runs.clone(),
            jobs.clone(),
            events.clone(),
            bus.clone(),
            routing.clone(),
            config.dispatch_timeout_ms,
        ));
        let skill_dispatcher = Arc::new(SkillDispatcher::new(
            Arc::new(crate::skills::default_registry()),
            jobs.clone(),
        ));
        let notifier = config.notify.webhook_url.as_ref().map(|url| {
            Arc::new(AlertNotifier::new(
                Arc::new(WebhookTransport::new(url.clone())),
                Arc::new(CircuitBreakerRegistry::new(
                    config.notify.failure_threshold,
                    config.notify.open_secs,
                )),
                bus.clone(),
                &config.notify,
            ))
        });

        Self {
            config,
            runs,
            jobs,
            events,
            bus,
            nodes,
            routing,
            hub,
            orchestrator,
            skill_dispatcher,
            notifier,
        }
    }

    pub fn web_state(&self) -> crate::web::AppState {
        crate::web::AppState {
            jobs: self.jobs.clone(),
            bus: self.bus.clone(),
            hub: self.hub.clone(),
            nodes: self.nodes.clone(),
            routing: self.routing.clone(),
        }
    }

    /// Spawn the background consumers this context is configured for.
    pub fn spawn_consumers(&self) -> Option<crate::orchestration::consumers::ConsumerHandles> {
        crate::orchestration::consumers::spawn_consumers(
            &self.config,
            self.orchestrator.clone(),
            self.hub.clone(),
            self.jobs.clone(),
            self.bus.clone(),
            self.skill_dispatcher.clone(),
            self.notifier.clone(),
        )
    }
}
