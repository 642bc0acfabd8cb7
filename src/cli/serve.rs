use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::backend::{ExecutionBackend, KubeBackend};
use crate::core::config::AppConfig;
use crate::core::lifecycle::LifecycleManager;
use crate::core::orchestrator::{
    ReconcilerSettings, RunCoordinator, RunnerSettings, StatusReconciler, StepExecutor,
    SyncSummary,
};
use crate::core::store::SqliteStore;
use crate::core::terminal::{self, print_link, print_status, print_success, print_warn};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::init_logging;

pub(crate) struct Services {
    pub store: Arc<SqliteStore>,
    pub coordinator: Arc<RunCoordinator>,
    pub reconciler: Arc<StatusReconciler>,
}

pub(crate) async fn build_services(config: &AppConfig) -> Result<Services> {
    let store = Arc::new(
        SqliteStore::open(&config.storage.database_path)
            .await
            .with_context(|| format!("opening {}", config.storage.database_path.display()))?,
    );
    let backend: Arc<dyn ExecutionBackend> = Arc::new(
        KubeBackend::connect(&config.cluster)
            .await
            .context("connecting to the cluster API")?,
    );

    let executor = StepExecutor::new(
        backend.clone(),
        RunnerSettings::from_config(&config.cluster, &config.runner),
    );
    let coordinator = Arc::new(RunCoordinator::new(
        store.clone(),
        executor,
        config.limits.parallelism(),
    ));
    let reconciler = Arc::new(StatusReconciler::new(
        store.clone(),
        backend,
        ReconcilerSettings {
            log_backfill_minutes: config.sync.log_backfill_minutes,
            log_tail_lines: config.sync.log_tail_lines,
        },
    ));

    Ok(Services {
        store,
        coordinator,
        reconciler,
    })
}

pub async fn run_serve(config: AppConfig) -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    init_logging(&config.logging.level, log_tx.clone(), false);

    info!("Starting loadrun orchestrator...");
    let services = build_services(&config).await?;

    let mut lifecycle = LifecycleManager::new().await?;
    let api = ApiServer::new(ApiServerConfig {
        store: services.store.clone(),
        coordinator: services.coordinator.clone(),
        reconciler: services.reconciler.clone(),
        log_tx,
        host: config.server.host.clone(),
        port: config.server.port,
    });
    lifecycle.attach(Arc::new(tokio::sync::Mutex::new(api)));

    if config.sync.enabled {
        lifecycle
            .schedule_sweeps(
                services.reconciler.clone(),
                Duration::from_secs(config.sync.interval_seconds),
            )
            .await?;
    } else {
        print_warn("Status sync disabled; use `loadrun sync` or POST /api/load-testing/sync.");
    }

    lifecycle.start().await?;

    print_success("loadrun is running. Press Ctrl+C to stop.");
    print_link("API", &format!("http://{}", config.bind_addr()));
    print_status("Namespace", &config.cluster.namespace);
    print_status("Database", &config.storage.database_path.display().to_string());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    lifecycle.shutdown().await?;
    Ok(())
}

pub async fn run_sync_once(config: AppConfig) -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(16);
    init_logging(&config.logging.level, log_tx, false);

    let services = build_services(&config).await?;
    let summary = services.reconciler.sweep().await?;
    print_summary(&summary);
    Ok(())
}

pub(crate) fn print_summary(summary: &SyncSummary) {
    if summary.skipped {
        print_warn("A sync is already in progress.");
        return;
    }
    print_success(&format!(
        "Checked {} step(s): {} updated, {} error(s), {} run(s) updated",
        summary.total_steps, summary.updated_steps, summary.error_steps, summary.updated_runs
    ));
    for result in &summary.results {
        let line = format!(
            "{} -> {}",
            terminal::status_label(result.previous.as_str()),
            terminal::status_label(result.status.as_str())
        );
        match &result.error {
            Some(e) => print_status(&result.k6_test_name, &format!("{} ({})", line, e)),
            None => print_status(&result.k6_test_name, &line),
        }
    }
}
