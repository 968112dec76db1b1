//! Orchestrator and dispatch hub process.
//!
//! Serves the internal HTTP surface and, unless disabled, runs the
//! background topic consumers. `DATABASE_URL` selects the Postgres
//! backend; without it the process runs fully in memory.

use anyhow::Context;
use reelforge_core::logging::init_structured_logging;
use reelforge_core::web::build_router;
use reelforge_core::{AppContext, CoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config = CoreConfig::from_env().context("loading configuration")?;
    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        %bind_addr,
        postgres = config.database_url.is_some(),
        consumers = config.enable_consumers,
        "starting reelforge hub"
    );

    let context = AppContext::from_config(config)
        .await
        .context("building application context")?;
    let consumers = context.spawn_consumers();

    let router = build_router(context.web_state());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "internal surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("serving internal surface")?;

    if let Some(handles) = consumers {
        handles.stop().await;
    }
    tracing::info!("reelforge hub stopped");
    Ok(())
}
