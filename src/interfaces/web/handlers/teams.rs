use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

use super::super::AppState;
use super::{ApiResponse, ok, store_error};
use crate::core::store::NewTeam;

#[derive(Deserialize)]
pub struct EnvironmentRequest {
    environment: BTreeMap<String, String>,
}

pub async fn get_teams(State(state): State<AppState>) -> ApiResponse {
    match state.store.list_teams().await {
        Ok(teams) => ok(StatusCode::OK, json!({ "success": true, "teams": teams })),
        Err(e) => store_error(e),
    }
}

pub async fn create_team(
    State(state): State<AppState>,
    Json(payload): Json<NewTeam>,
) -> ApiResponse {
    match state.store.create_team(&payload).await {
        Ok(team) => ok(StatusCode::CREATED, json!({ "success": true, "team": team })),
        Err(e) => store_error(e),
    }
}

pub async fn set_environment(
    Path(team_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<EnvironmentRequest>,
) -> ApiResponse {
    match state
        .store
        .set_team_environment(&team_id, &payload.environment)
        .await
    {
        Ok(team) => ok(StatusCode::OK, json!({ "success": true, "team": team })),
        Err(e) => store_error(e),
    }
}
