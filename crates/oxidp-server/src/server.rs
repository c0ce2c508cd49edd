//! Process lifecycle: bind, serve, shut down.

use anyhow::Context;
use tracing::info;

use oxidp_config::AppConfig;

use crate::bootstrap::bootstrap;
use crate::maintenance;
use crate::routes::build_router;

/// Boots the application and serves until shutdown.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let app = bootstrap(config).await?;
    let router = build_router(&app);

    tokio::spawn(maintenance::run(app.maintenance.clone()));

    let addr = format!("{}:{}", app.config.server.host, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(addr = %addr, issuer = %app.config.issuer, "authorization server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    // Ctrl-C locally, SIGTERM under an orchestrator.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
