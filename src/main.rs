use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use rag_api::api::{create_router, AppState};
use rag_api::infrastructure::{build_services, telemetry, AppConfig};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("api=debug,rag_api=debug,tower_http=debug");

    let config = AppConfig::load().context("failed to load configuration")?;
    let services = build_services(&config)?;
    let addr = SocketAddr::new(
        config.config.server.host.parse().context("invalid server host")?,
        config.config.server.port,
    );

    let state = AppState::new(
        services.documents,
        services.rag,
        services.scheduler.clone(),
        services.store,
        config,
    );

    // Serve while reconciling; /ready reports 503 until this finishes.
    let startup = state.clone();
    tokio::spawn(async move {
        startup
            .reconcile_until_ready(RECONCILE_RETRY_DELAY)
            .await
    });

    let app = create_router(state);

    info!("API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(SHUTDOWN_GRACE, services.scheduler.drain())
        .await
        .is_err()
    {
        tracing::warn!("index jobs still running at shutdown; reconciliation will resume them");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
