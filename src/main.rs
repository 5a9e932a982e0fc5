use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agent_jobs::agents::AgentCatalog;
use agent_jobs::config::ServiceConfig;
use agent_jobs::jobs::registry::spawn_retention_task;
use agent_jobs::service::logs::LOG_EXTENSION;
use agent_jobs::service::{RunService, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(config.as_ref().ok().and_then(|c| c.log_dir.as_deref()));

    let config = config.context("invalid configuration")?;

    eprintln!("⚙️  Agent Jobs v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: http://{}", config.bind_addr());
    eprintln!("   Default agent: {}", config.default_agent);
    eprintln!(
        "   Auth: {}",
        if config.auth_secret.is_some() { "bearer token" } else { "disabled" }
    );

    let catalog = AgentCatalog::with_builtin(config.default_agent.clone());
    catalog
        .get(&config.default_agent)
        .context("default agent is not registered")?;

    let service = Arc::new(RunService::new(catalog, &config));

    // ── Retention ───────────────────────────────────────────────────────
    match config.retention.ttl {
        Some(ttl) => {
            let _sweeper = spawn_retention_task(
                Arc::clone(service.registry()),
                config.retention.sweep_interval,
                ttl,
            );
            eprintln!(
                "   Retention: {}s (sweep every {}s)",
                ttl.as_secs(),
                config.retention.sweep_interval.as_secs()
            );
        }
        None => eprintln!("   Retention: disabled"),
    }

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = router(Arc::clone(&service), config.auth_secret.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    tracing::info!(addr = %config.bind_addr(), workers = config.worker_threads, "Run service started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown();
    let summary = service.registry().summary().await;
    tracing::info!(
        total = summary.total,
        running = summary.running,
        completed = summary.completed,
        failed = summary.failed,
        "Run service stopped"
    );
    Ok(())
}

fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Daily files named `agent-jobs.YYYY-MM-DD.txt`, the names `/logs` serves.
    let appender = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("agent-jobs")
            .filename_suffix(LOG_EXTENSION)
            .build(dir)
            .inspect_err(|e| eprintln!("⚠️  File logging disabled: {e}"))
            .ok()
    });

    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received");
}
