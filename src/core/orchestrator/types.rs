use serde::{Deserialize, Serialize};

/// Aggregate status of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            "CANCELLED" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single step execution inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// The backend no longer knows the execution.
    Deleted,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Cancelled => "CANCELLED",
            StepStatus::Deleted => "DELETED",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(StepStatus::Pending),
            "RUNNING" => Some(StepStatus::Running),
            "COMPLETED" => Some(StepStatus::Completed),
            "FAILED" => Some(StepStatus::Failed),
            "CANCELLED" => Some(StepStatus::Cancelled),
            "DELETED" => Some(StepStatus::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }

    /// Allowed moves for an observed status. Terminal states are sticky except
    /// for the backend dropping the execution, and a running step never
    /// regresses to pending.
    pub fn can_transition(self, to: StepStatus) -> bool {
        if self == to {
            return true;
        }
        match self {
            StepStatus::Pending => true,
            StepStatus::Running => to != StepStatus::Pending,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled => {
                to == StepStatus::Deleted
            }
            StepStatus::Deleted => false,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a scenario step executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", content = "config", rename_all = "snake_case")]
pub enum StepKind {
    /// A literal k6 script, passed through untouched.
    #[serde(alias = "k6_script")]
    Script {
        #[serde(default)]
        script: String,
    },
    /// Declarative GET check rendered into a fixed-profile k6 script.
    #[serde(alias = "http_request")]
    HttpCheck {
        #[serde(default)]
        url: String,
        #[serde(default, alias = "delay", skip_serializing_if = "Option::is_none")]
        delay_secs: Option<f64>,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Script { .. } => "script",
            StepKind::HttpCheck { .. } => "http_check",
        }
    }

    /// Rebuilds a kind from the stored `step_type` column and config payload.
    pub fn from_parts(step_type: &str, config: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::json!({
            "step_type": step_type,
            "config": config,
        }))
    }

    pub fn config_value(&self) -> serde_json::Value {
        match self {
            StepKind::Script { script } => serde_json::json!({ "script": script }),
            StepKind::HttpCheck { url, delay_secs } => match delay_secs {
                Some(delay) => serde_json::json!({ "url": url, "delay_secs": delay }),
                None => serde_json::json!({ "url": url }),
            },
        }
    }
}

/// Who asked for a run. Participants are capped tighter than organizers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Organizer,
    Participant { creator_id: String },
}

impl TriggerSource {
    pub fn creator_id(&self) -> Option<&str> {
        match self {
            TriggerSource::Organizer => None,
            TriggerSource::Participant { creator_id } => Some(creator_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelismLimits {
    pub organizer_max: u32,
    pub participant_max: u32,
}

impl Default for ParallelismLimits {
    fn default() -> Self {
        Self {
            organizer_max: 10,
            participant_max: 5,
        }
    }
}

impl ParallelismLimits {
    pub fn max_for(&self, source: &TriggerSource) -> u32 {
        match source {
            TriggerSource::Organizer => self.organizer_max,
            TriggerSource::Participant { .. } => self.participant_max,
        }
    }

    /// Validates a requested replica count; `None` means 1.
    pub fn resolve(&self, requested: Option<u32>, source: &TriggerSource) -> Result<u32, String> {
        let max = self.max_for(source);
        let value = requested.unwrap_or(1);
        if value < 1 || value > max {
            return Err(format!("parallelism must be between 1 and {}", max));
        }
        Ok(value)
    }
}
