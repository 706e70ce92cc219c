use anyhow::{Context, Result};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{error, info};

use crate::orchestrator::Orchestrator;
use crate::web::PgPool;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migrations failed: {}", e))?;
    if !applied.is_empty() {
        info!("Applied {} pending migrations", applied.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

/// Run the full service: migrations, metrics, scheduler, poll workers, web.
pub async fn handle_run(interface: String, port: u16, diesel_pool: PgPool) -> Result<()> {
    // Recorder first, then the zero-valued registrations, then the server:
    // anything recorded before the recorder exists is silently dropped.
    crate::metrics::install();
    crate::metrics::initialize_core_metrics();
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090);
    tokio::spawn(async move {
        crate::metrics::start_metrics_server(metrics_port).await;
    });

    run_migrations(&diesel_pool)?;

    let orchestrator = Orchestrator::from_env(diesel_pool.clone())?;
    orchestrator.start();

    let app = crate::web::build_router(diesel_pool, orchestrator.clone());
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", interface, port))?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Workers observe the cancellation and finish their current cycle
    // inside the grace window.
    orchestrator.shutdown().await;
    info!("Service stopped");
    Ok(())
}
