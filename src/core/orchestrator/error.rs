use thiserror::Error;

use crate::core::store::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad trigger parameters. Raised before anything is written.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A single step could not be submitted to the execution backend.
    #[error("{0}")]
    Provisioning(String),

    /// Executions were started but the run row could not be updated.
    #[error("could not persist run state for run {run_id} ({} execution(s) already submitted): {source}", submitted.len())]
    Persistence {
        run_id: String,
        submitted: Vec<String>,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        OrchestratorError::NotFound {
            entity,
            id: id.into(),
        }
    }
}
