//! Periodic reconciliation of step executions with what the backend reports.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::OrchestratorError;
use super::naming::config_map_name;
use super::types::{RunStatus, StepStatus};
use crate::core::backend::{BackendError, ExecutionBackend, TestRunStage};
use crate::core::store::{RunStep, RunStore, StepSyncUpdate, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub log_backfill_minutes: u32,
    pub log_tail_lines: u32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            log_backfill_minutes: 120,
            log_tail_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSyncResult {
    pub step_id: String,
    pub k6_test_name: String,
    pub previous: StepStatus,
    pub status: StepStatus,
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub total_steps: usize,
    pub updated_steps: usize,
    pub error_steps: usize,
    pub updated_runs: usize,
    /// Another sweep was already in progress.
    pub skipped: bool,
    pub results: Vec<StepSyncResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub run_id: String,
    pub deleted: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

/// Aggregate run status from its steps. `None` keeps the current status.
pub fn roll_up(statuses: &[StepStatus]) -> Option<RunStatus> {
    if statuses.is_empty() {
        return None;
    }
    if statuses.iter().all(|s| s.is_terminal()) {
        return Some(if statuses.iter().all(|s| *s == StepStatus::Completed) {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        });
    }
    if statuses.contains(&StepStatus::Running) {
        return Some(RunStatus::Running);
    }
    None
}

pub struct StatusReconciler {
    store: Arc<dyn RunStore>,
    backend: Arc<dyn ExecutionBackend>,
    settings: ReconcilerSettings,
    sweep_lock: Mutex<()>,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn RunStore>,
        backend: Arc<dyn ExecutionBackend>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            backend,
            settings,
            sweep_lock: Mutex::new(()),
        }
    }

    /// One pass over outstanding steps. Returns immediately with `skipped`
    /// set when a sweep is already running.
    pub async fn sweep(&self) -> Result<SyncSummary, OrchestratorError> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            debug!("Sweep already in progress, skipping");
            return Ok(SyncSummary {
                skipped: true,
                ..SyncSummary::default()
            });
        };

        let candidates = self
            .store
            .sync_candidates(self.settings.log_backfill_minutes)
            .await?;
        let mut summary = SyncSummary {
            total_steps: candidates.len(),
            ..SyncSummary::default()
        };
        let mut touched_runs = BTreeSet::new();

        for step in &candidates {
            let result = self.sync_step(step).await;
            if result.error.is_some() {
                summary.error_steps += 1;
            } else if result.updated {
                summary.updated_steps += 1;
            }
            touched_runs.insert(step.test_run_id.clone());
            summary.results.push(result);
        }

        for run_id in &touched_runs {
            match self.roll_up_run(run_id).await {
                Ok(true) => summary.updated_runs += 1,
                Ok(false) => {}
                Err(e) => warn!("Could not roll up run {}: {}", run_id, e),
            }
        }

        if summary.total_steps > 0 {
            info!(
                "Sweep: {} step(s) checked, {} updated, {} error(s), {} run(s) updated",
                summary.total_steps,
                summary.updated_steps,
                summary.error_steps,
                summary.updated_runs
            );
        }
        Ok(summary)
    }

    /// Current status of an execution as a step status. A finished run with
    /// any failed replica counts as failed.
    pub async fn observe(&self, handle: &str) -> Result<StepStatus, BackendError> {
        let stage = match self.backend.get_status(handle).await {
            Ok(stage) => stage,
            Err(e) if e.is_not_found() => return Ok(StepStatus::Deleted),
            Err(e) => return Err(e),
        };
        if stage != TestRunStage::Finished {
            return Ok(stage.to_step_status());
        }
        match self.backend.list_runner_pods(handle).await {
            Ok(pods) if pods.iter().any(|p| p.has_failed()) => Ok(StepStatus::Failed),
            Ok(_) => Ok(StepStatus::Completed),
            Err(e) => {
                warn!("Could not inspect replicas of {}: {}", handle, e);
                Ok(StepStatus::Completed)
            }
        }
    }

    async fn sync_step(&self, step: &RunStep) -> StepSyncResult {
        let handle = step.k6_test_name.clone().unwrap_or_default();
        let mut result = StepSyncResult {
            step_id: step.id.clone(),
            k6_test_name: handle.clone(),
            previous: step.status,
            status: step.status,
            updated: false,
            error: None,
        };

        let observed = match self.observe(&handle).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Status check of {} failed: {}", handle, e);
                result.error = Some(e.to_string());
                return result;
            }
        };

        let next = if step.status.can_transition(observed) {
            observed
        } else {
            debug!(
                "Ignoring {} -> {} for {}",
                step.status, observed, handle
            );
            step.status
        };

        let logs = if next == StepStatus::Deleted {
            None
        } else {
            self.fresh_logs(&handle, step.container_logs.as_deref(), self.settings.log_tail_lines)
                .await
        };

        let update = StepSyncUpdate {
            status: next,
            container_logs: logs,
        };
        if let Err(e) = self.store.apply_step_sync(&step.id, &update).await {
            warn!("Could not save status of {}: {}", handle, e);
            result.error = Some(e.to_string());
            return result;
        }

        if next != step.status {
            info!("Step {} ({}): {} -> {}", step.step_name, handle, step.status, next);
        }
        result.status = next;
        result.updated = next != step.status || update.container_logs.is_some();
        result
    }

    /// Logs that differ from what is stored, if any could be read.
    async fn fresh_logs(&self, handle: &str, stored: Option<&str>, tail_lines: u32) -> Option<String> {
        match self.backend.get_logs(handle, tail_lines).await {
            Ok(Some(logs)) if stored != Some(logs.as_str()) => Some(logs),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read logs of {}: {}", handle, e);
                None
            }
        }
    }

    async fn roll_up_run(&self, run_id: &str) -> Result<bool, StoreError> {
        let Some(run) = self.store.get_run(run_id).await? else {
            return Ok(false);
        };
        if run.status.is_terminal() {
            return Ok(false);
        }
        let statuses: Vec<StepStatus> = self
            .store
            .run_steps(run_id)
            .await?
            .iter()
            .map(|s| s.status)
            .collect();
        match roll_up(&statuses) {
            Some(next) if next != run.status => {
                self.store.set_run_status(run_id, next).await?;
                info!("Run #{}: {} -> {}", run.run_number, run.status, next);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// A run step, with logs refreshed from the backend while it is active.
    pub async fn step_details(
        &self,
        step_id: &str,
        tail_lines: Option<u32>,
    ) -> Result<RunStep, OrchestratorError> {
        let step = self
            .store
            .get_run_step(step_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("run step", step_id))?;
        let Some(handle) = step.k6_test_name.clone().filter(|_| !step.status.is_terminal()) else {
            return Ok(step);
        };

        let tail = tail_lines.unwrap_or(self.settings.log_tail_lines).max(1);
        if let Some(logs) = self
            .fresh_logs(&handle, step.container_logs.as_deref(), tail)
            .await
        {
            self.store
                .apply_step_sync(
                    &step.id,
                    &StepSyncUpdate {
                        status: step.status,
                        container_logs: Some(logs),
                    },
                )
                .await?;
        }
        self.store
            .get_run_step(step_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("run step", step_id))
    }

    /// Deletes every execution of a run and its script config. Failures are
    /// collected per name; nothing in the database changes.
    pub async fn cleanup_run(&self, run_id: &str) -> Result<CleanupReport, OrchestratorError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("run", run_id))?;
        let mut names: BTreeSet<String> = run.k6_test_names.iter().cloned().collect();
        names.extend(
            self.store
                .run_steps(run_id)
                .await?
                .into_iter()
                .filter_map(|s| s.k6_test_name),
        );

        let mut report = CleanupReport {
            run_id: run.id.clone(),
            deleted: Vec::new(),
            failures: Vec::new(),
        };
        for name in names {
            let mut failed = false;
            for (kind, result) in [
                ("run", self.backend.delete_run(&name).await),
                ("config", self.backend.delete_config(&config_map_name(&name)).await),
            ] {
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!("{} {} already gone", kind, name),
                    Err(e) => {
                        warn!("Cleanup of {} {} failed: {}", kind, name, e);
                        report.failures.push(CleanupFailure {
                            name: name.clone(),
                            error: e.to_string(),
                        });
                        failed = true;
                    }
                }
            }
            if !failed {
                report.deleted.push(name);
            }
        }
        info!(
            "Cleanup of run #{}: {} removed, {} failed",
            run.run_number,
            report.deleted.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
