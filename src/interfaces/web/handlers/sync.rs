use axum::{extract::State, http::StatusCode};
use serde_json::json;

use super::super::AppState;
use super::{ApiResponse, ok, orchestrator_error};

pub async fn sync_now(State(state): State<AppState>) -> ApiResponse {
    match state.reconciler.sweep().await {
        Ok(summary) if summary.skipped => ok(
            StatusCode::ACCEPTED,
            json!({
                "success": true,
                "message": "A sync is already in progress",
                "summary": summary,
            }),
        ),
        Ok(summary) => ok(StatusCode::OK, json!({ "success": true, "summary": summary })),
        Err(e) => orchestrator_error(e),
    }
}
