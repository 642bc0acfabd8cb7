use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::orchestrator::{RunStatus, StepKind, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub slug: String,
    pub name: String,
    /// Injected into every runner of this team's executions.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTeam {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewScenario {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub id: String,
    pub scenario_id: String,
    pub name: String,
    pub description: Option<String>,
    pub step_order: i64,
    #[serde(flatten)]
    pub kind: StepKind,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStep {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Omitted means append after the current last step.
    #[serde(default)]
    pub step_order: Option<i64>,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update of a scenario step. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub step_order: Option<i64>,
    #[serde(default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl StepPatch {
    /// New kind for the step, if the patch changes it. A bare `config` keeps
    /// the current type.
    pub fn kind(&self, current: &StepKind) -> serde_json::Result<Option<StepKind>> {
        match (&self.step_type, &self.config) {
            (None, None) => Ok(None),
            (step_type, config) => StepKind::from_parts(
                step_type.as_deref().unwrap_or(current.type_name()),
                config.clone().unwrap_or_else(|| current.config_value()),
            )
            .map(Some),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub run_number: i64,
    pub scenario_id: String,
    pub team_id: String,
    pub comment: Option<String>,
    /// Absent for organizer-triggered runs.
    pub created_by: Option<String>,
    pub parallelism: u32,
    pub status: RunStatus,
    pub k6_test_names: Vec<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub scenario_id: String,
    pub team_id: String,
    pub comment: Option<String>,
    pub created_by: Option<String>,
    pub parallelism: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub test_run_id: String,
    pub scenario_step_id: String,
    pub step_name: String,
    pub step_order: i64,
    pub step_type: String,
    pub k6_test_name: Option<String>,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub container_logs: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_status_check: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRunStep {
    pub test_run_id: String,
    pub scenario_step_id: String,
    pub step_name: String,
    pub step_order: i64,
    pub step_type: String,
}

/// Result of observing one step against the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSyncUpdate {
    pub status: StepStatus,
    /// Replaces stored logs when present.
    pub container_logs: Option<String>,
}
