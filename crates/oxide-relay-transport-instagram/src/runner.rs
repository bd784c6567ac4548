use crate::config::ServerSettings;
use crate::graph::GraphClient;
use crate::server::{router, AppState};
use anyhow::Context;
use oxide_relay_core::{OpenAiResponder, Responder};
use oxide_relay_runtime::{ChatTransport, Orchestrator, OrchestratorConfig, RelayState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Run the Instagram relay HTTP server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the stores cannot be built from settings, the Graph
/// client cannot be created, or the listener fails.
pub async fn run_server(settings: ServerSettings) -> anyhow::Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&settings)?);
    info!(
        triggers = orchestrator.triggers().snapshot().len(),
        "Relay pipeline initialized."
    );

    let reaper = orchestrator.tasks().spawn_reaper();
    let app = router(AppState {
        orchestrator: Arc::clone(&orchestrator),
        settings: Arc::clone(&settings.instagram),
    });

    let addr = settings.instagram.bind_addr.as_str();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Relay is listening...");

    let tasks = Arc::clone(orchestrator.tasks());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            tasks.shutdown();
        })
        .await
        .context("HTTP server failed")?;

    if let Err(e) = reaper.await {
        warn!(error = %e, "Reaper task ended abnormally");
    }
    info!(active_tasks = orchestrator.tasks().active_count(), "Relay stopped");
    Ok(())
}

fn build_orchestrator(settings: &ServerSettings) -> anyhow::Result<Orchestrator> {
    let state = RelayState::from_settings(&settings.relay).context("Invalid relay settings")?;

    let responder = OpenAiResponder::new(&settings.relay);
    if !responder.is_configured() {
        warn!("OpenAI API key is not set; every reply will be the fallback message");
    }
    let responder: Arc<dyn Responder> = Arc::new(responder);

    let transport: Arc<dyn ChatTransport> =
        Arc::new(GraphClient::new(&settings.instagram).context("Failed to build Graph client")?);

    Ok(Orchestrator::new(
        state,
        responder,
        transport,
        OrchestratorConfig::from(settings.relay.as_ref()),
    ))
}
