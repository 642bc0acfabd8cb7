use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, failure, ok, orchestrator_error, store_error};
use crate::core::orchestrator::{RunDisposition, RunOutcome, RunRequest, TriggerSource};
use crate::core::store::RunStore;

#[derive(Deserialize)]
pub struct TriggerRunRequest {
    scenario_id: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    parallelism: Option<u32>,
}

#[derive(Deserialize)]
pub struct ParticipantRunRequest {
    #[serde(flatten)]
    run: TriggerRunRequest,
    #[serde(default)]
    creator_id: Option<String>,
}

#[derive(Deserialize)]
pub struct StepDetailsQuery {
    #[serde(default)]
    tail_lines: Option<u32>,
}

fn outcome_response(outcome: RunOutcome) -> ApiResponse {
    match outcome.disposition() {
        RunDisposition::Started => ok(
            StatusCode::CREATED,
            json!({
                "success": true,
                "run": outcome.run,
                "k6_test_names": outcome.submitted,
                "total_steps": outcome.total_steps,
                "successful_steps": outcome.successful_steps,
            }),
        ),
        RunDisposition::PartiallyStarted => ok(
            StatusCode::MULTI_STATUS,
            json!({
                "success": true,
                "run": outcome.run,
                "k6_test_names": outcome.submitted,
                "failed_steps": outcome.failed_steps,
                "total_steps": outcome.total_steps,
                "successful_steps": outcome.successful_steps,
            }),
        ),
        RunDisposition::TotalFailure => ok(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "success": false,
                "error": "no step could be started",
                "run": outcome.run,
                "failed_steps": outcome.failed_steps,
                "total_steps": outcome.total_steps,
            }),
        ),
    }
}

async fn start(
    state: &AppState,
    team_id: String,
    body: TriggerRunRequest,
    source: TriggerSource,
) -> ApiResponse {
    let request = RunRequest {
        scenario_id: body.scenario_id,
        team_id,
        comment: body.comment.filter(|c| !c.trim().is_empty()),
        parallelism: body.parallelism,
        source,
    };
    match state.coordinator.start_run(request).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn trigger_organizer_run(
    Path(team_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<TriggerRunRequest>,
) -> ApiResponse {
    start(&state, team_id, payload, TriggerSource::Organizer).await
}

pub async fn trigger_participant_run(
    Path(team_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ParticipantRunRequest>,
) -> ApiResponse {
    let source = TriggerSource::Participant {
        creator_id: payload.creator_id.unwrap_or_default().trim().to_string(),
    };
    start(&state, team_id, payload.run, source).await
}

async fn list_runs(state: &AppState, team_id: &str, participant_only: bool) -> ApiResponse {
    match state.store.find_team(team_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return failure(StatusCode::NOT_FOUND, format!("team '{}' not found", team_id)),
        Err(e) => return store_error(e),
    }
    match state.store.list_team_runs(team_id, participant_only).await {
        Ok(runs) => ok(StatusCode::OK, json!({ "success": true, "runs": runs })),
        Err(e) => store_error(e),
    }
}

pub async fn get_team_runs(
    Path(team_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    list_runs(&state, &team_id, false).await
}

pub async fn get_participant_runs(
    Path(team_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    list_runs(&state, &team_id, true).await
}

pub async fn get_run(Path(run_id): Path<String>, State(state): State<AppState>) -> ApiResponse {
    let run = match state.store.get_run(&run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return failure(StatusCode::NOT_FOUND, format!("run '{}' not found", run_id)),
        Err(e) => return store_error(e),
    };
    match state.store.run_steps(&run_id).await {
        Ok(steps) => ok(
            StatusCode::OK,
            json!({ "success": true, "run": run, "steps": steps }),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn get_run_step(
    Path(step_id): Path<String>,
    Query(query): Query<StepDetailsQuery>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.reconciler.step_details(&step_id, query.tail_lines).await {
        Ok(step) => ok(StatusCode::OK, json!({ "success": true, "step": step })),
        Err(e) => orchestrator_error(e),
    }
}

pub async fn cleanup_run_executions(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.reconciler.cleanup_run(&run_id).await {
        Ok(report) if report.failures.is_empty() => {
            ok(StatusCode::OK, json!({ "success": true, "cleanup": report }))
        }
        Ok(report) => ok(
            StatusCode::MULTI_STATUS,
            json!({ "success": false, "cleanup": report }),
        ),
        Err(e) => orchestrator_error(e),
    }
}
