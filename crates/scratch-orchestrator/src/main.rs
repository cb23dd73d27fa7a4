use std::sync::Arc;

use anyhow::Context;
use scratch_orchestrator::{
    api::{self, AppState},
    config::Settings,
    port_alloc::TcpPortProbe,
    runtime::{ContainerRuntime, DockerRuntime},
    session_manager::SessionManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;

    let runtime = DockerRuntime::connect().context("connect to docker")?;
    // A daemon that is down at boot may come back; sessions fail until it does.
    if let Err(e) = runtime.ping().await {
        tracing::warn!(error = %e, "docker is not answering yet");
    }

    let sessions = SessionManager::new(
        settings.session.clone(),
        Arc::new(runtime),
        Arc::new(TcpPortProbe),
    );
    tracing::info!(
        profile = sessions.profile().as_str(),
        url_mode = sessions.url_mode(),
        pool_start = settings.session.pool.start,
        pool_end = settings.session.pool.end,
        "session orchestrator configured"
    );

    let app = api::router(AppState { sessions }, &settings.static_dir);
    let addr = settings.listen_addr;
    tracing::info!(%addr, "scratch-orchestrator HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
