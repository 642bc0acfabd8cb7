use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, ok, store_error};
use crate::core::store::{NewScenario, NewStep, StepPatch};

#[derive(Deserialize)]
pub struct ReorderRequest {
    new_order: i64,
}

pub async fn get_scenarios(State(state): State<AppState>) -> ApiResponse {
    match state.store.list_scenarios().await {
        Ok(scenarios) => ok(
            StatusCode::OK,
            json!({ "success": true, "scenarios": scenarios }),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn create_scenario(
    State(state): State<AppState>,
    Json(payload): Json<NewScenario>,
) -> ApiResponse {
    match state.store.create_scenario(&payload).await {
        Ok(scenario) => ok(
            StatusCode::CREATED,
            json!({ "success": true, "scenario": scenario }),
        ),
        Err(e) => store_error(e),
    }
}

pub async fn get_steps(
    Path(scenario_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse {
    match state.store.list_steps(&scenario_id).await {
        Ok(steps) => ok(StatusCode::OK, json!({ "success": true, "steps": steps })),
        Err(e) => store_error(e),
    }
}

pub async fn add_step(
    Path(scenario_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<NewStep>,
) -> ApiResponse {
    match state.store.add_step(&scenario_id, &payload).await {
        Ok(step) => ok(StatusCode::CREATED, json!({ "success": true, "step": step })),
        Err(e) => store_error(e),
    }
}

pub async fn update_step(
    Path((scenario_id, step_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<StepPatch>,
) -> ApiResponse {
    match state.store.update_step(&scenario_id, &step_id, &payload).await {
        Ok(step) => ok(StatusCode::OK, json!({ "success": true, "step": step })),
        Err(e) => store_error(e),
    }
}

pub async fn reorder_step(
    Path((scenario_id, step_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<ReorderRequest>,
) -> ApiResponse {
    match state
        .store
        .reorder_step(&scenario_id, &step_id, payload.new_order)
        .await
    {
        Ok(steps) => ok(StatusCode::OK, json!({ "success": true, "steps": steps })),
        Err(e) => store_error(e),
    }
}
