pub mod runs;
pub mod scenarios;
pub mod sync;
pub mod teams;

use axum::{Json, http::StatusCode};
use serde_json::{Value, json};
use tracing::error;

use crate::core::orchestrator::OrchestratorError;
use crate::core::store::StoreError;

pub(super) type ApiResponse = (StatusCode, Json<Value>);

pub(super) fn ok(status: StatusCode, body: Value) -> ApiResponse {
    (status, Json(body))
}

pub(super) fn failure(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.into()
        })),
    )
}

pub(super) fn store_error(err: StoreError) -> ApiResponse {
    match err {
        StoreError::NotFound { .. } => failure(StatusCode::NOT_FOUND, err.to_string()),
        StoreError::Conflict(msg) => failure(StatusCode::CONFLICT, msg),
        StoreError::Invalid(msg) => failure(StatusCode::BAD_REQUEST, msg),
        other => {
            error!("Store error: {}", other);
            failure(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

pub(super) fn orchestrator_error(err: OrchestratorError) -> ApiResponse {
    match err {
        OrchestratorError::Validation(msg) => failure(StatusCode::BAD_REQUEST, msg),
        OrchestratorError::NotFound { .. } => failure(StatusCode::NOT_FOUND, err.to_string()),
        OrchestratorError::Persistence {
            run_id,
            submitted,
            source,
        } => {
            error!(
                "Run {} lost its final state after {} submission(s): {}",
                run_id,
                submitted.len(),
                source
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "could not persist run state",
                    "run_id": run_id,
                    "submitted": submitted,
                })),
            )
        }
        OrchestratorError::Store(e) => store_error(e),
        OrchestratorError::Provisioning(msg) => failure(StatusCode::BAD_GATEWAY, msg),
    }
}
