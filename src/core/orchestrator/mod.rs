//! Run orchestration: turning a scenario trigger into cluster executions and
//! folding their outcomes back into run state.

mod coordinator;
mod error;
mod executor;
pub mod naming;
mod reconciler;
pub mod script;
pub mod types;

pub use coordinator::{RunCoordinator, RunDisposition, RunOutcome, RunRequest};
pub use error::OrchestratorError;
pub use executor::{RunnerSettings, StepExecutor};
pub use reconciler::{ReconcilerSettings, StatusReconciler, SyncSummary, roll_up};
pub use types::{ParallelismLimits, RunStatus, StepKind, StepStatus, TriggerSource};

#[cfg(test)]
mod tests;
