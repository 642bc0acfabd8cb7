use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::error::OrchestratorError;
use super::executor::{StepExecutor, StepSubmission};
use super::script::resolve_script;
use super::types::{ParallelismLimits, RunStatus, TriggerSource};
use crate::core::store::{NewRun, NewRunStep, RunStore, ScenarioStep, TestRun};

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scenario_id: String,
    pub team_id: String,
    pub comment: Option<String>,
    pub parallelism: Option<u32>,
    pub source: TriggerSource,
}

/// How a start attempt ended from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    Started,
    PartiallyStarted,
    TotalFailure,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run: TestRun,
    /// Backend handle names, in submission order.
    pub submitted: Vec<String>,
    pub failed_steps: Vec<String>,
    pub total_steps: usize,
    pub successful_steps: usize,
}

impl RunOutcome {
    pub fn disposition(&self) -> RunDisposition {
        if self.submitted.is_empty() {
            RunDisposition::TotalFailure
        } else if self.failed_steps.is_empty() {
            RunDisposition::Started
        } else {
            RunDisposition::PartiallyStarted
        }
    }
}

pub struct RunCoordinator {
    store: Arc<dyn RunStore>,
    executor: StepExecutor,
    limits: ParallelismLimits,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn RunStore>, executor: StepExecutor, limits: ParallelismLimits) -> Self {
        Self {
            store,
            executor,
            limits,
        }
    }

    /// Starts one execution per runnable step of the scenario. A failing step
    /// never stops the remaining ones; the run fails only if none started.
    pub async fn start_run(&self, request: RunRequest) -> Result<RunOutcome, OrchestratorError> {
        let parallelism = self
            .limits
            .resolve(request.parallelism, &request.source)
            .map_err(OrchestratorError::Validation)?;
        if let TriggerSource::Participant { creator_id } = &request.source
            && creator_id.trim().is_empty()
        {
            return Err(OrchestratorError::Validation(
                "creator_id is required for participant runs".to_string(),
            ));
        }

        let team = self
            .store
            .get_team(&request.team_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("team", &request.team_id))?;
        let scenario = self
            .store
            .get_scenario(&request.scenario_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("scenario", &request.scenario_id))?;

        let eligible: Vec<(ScenarioStep, String)> = self
            .store
            .active_steps(&scenario.id)
            .await?
            .into_iter()
            .filter_map(|step| resolve_script(&step.kind).map(|script| (step, script)))
            .collect();
        if eligible.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "scenario '{}' has no runnable steps",
                scenario.identifier
            )));
        }

        let run = self
            .store
            .create_run(&NewRun {
                scenario_id: scenario.id.clone(),
                team_id: team.id.clone(),
                comment: request.comment.clone(),
                created_by: request.source.creator_id().map(str::to_string),
                parallelism,
            })
            .await?;
        info!(
            "Run #{} created for team {} / scenario {} ({} step(s))",
            run.run_number,
            team.slug,
            scenario.identifier,
            eligible.len()
        );

        let total_steps = eligible.len();
        let mut submitted = Vec::with_capacity(total_steps);
        let mut failed_steps = Vec::new();

        for (step, script) in eligible {
            let run_step = match self
                .store
                .create_run_step(&NewRunStep {
                    test_run_id: run.id.clone(),
                    scenario_step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    step_order: step.step_order,
                    step_type: step.kind.type_name().to_string(),
                })
                .await
            {
                Ok(run_step) => run_step,
                Err(e) => {
                    warn!(
                        "Run #{}: could not record step '{}': {}",
                        run.run_number, step.name, e
                    );
                    failed_steps.push(step.name);
                    continue;
                }
            };

            let submission = StepSubmission {
                team_slug: team.slug.clone(),
                scenario_identifier: scenario.identifier.clone(),
                step_name: step.name.clone(),
                step_order: step.step_order,
                run_number: run.run_number,
                script,
                parallelism,
                env: team.environment.clone(),
            };

            match self.executor.submit(&submission).await {
                Ok(handle) => {
                    if let Err(e) = self.store.mark_step_running(&run_step.id, &handle).await {
                        warn!(
                            "Run #{}: {} started but step state was not saved: {}",
                            run.run_number, handle, e
                        );
                    }
                    submitted.push(handle);
                }
                Err(e) => {
                    warn!(
                        "Run #{}: step '{}' failed to start: {}",
                        run.run_number, step.name, e
                    );
                    if let Err(store_err) =
                        self.store.mark_step_failed(&run_step.id, &e.to_string()).await
                    {
                        warn!(
                            "Run #{}: could not record failure of '{}': {}",
                            run.run_number, step.name, store_err
                        );
                    }
                    failed_steps.push(step.name);
                }
            }
        }

        let status = if submitted.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Running
        };
        let run = self
            .store
            .finalize_run(&run.id, status, &submitted)
            .await
            .map_err(|source| OrchestratorError::Persistence {
                run_id: run.id.clone(),
                submitted: submitted.clone(),
                source,
            })?;

        let successful_steps = submitted.len();
        info!(
            "Run #{} is {}: {}/{} step(s) started",
            run.run_number, run.status, successful_steps, total_steps
        );
        Ok(RunOutcome {
            run,
            submitted,
            failed_steps,
            total_steps,
            successful_steps,
        })
    }
}
