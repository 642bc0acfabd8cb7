//! Execution backend: where step executions actually run.
//!
//! The trait is a thin, retry-free wrapper over the cluster API. Callers own
//! any retry policy.

#[cfg(test)]
pub(crate) mod fake;
mod kubernetes;
pub mod resources;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::core::orchestrator::StepStatus;

pub use kubernetes::KubeBackend;
pub use resources::{K6TestRun, ScriptConfigMap};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("cluster API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("backend misconfigured: {0}")]
    Config(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Stage reported by the k6 operator on a `TestRun`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestRunStage {
    Initialization,
    Initialized,
    Created,
    Started,
    Finished,
    Stopped,
    Error,
    Unknown(String),
}

impl TestRunStage {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "initialization" => TestRunStage::Initialization,
            "initialized" => TestRunStage::Initialized,
            "created" => TestRunStage::Created,
            "started" => TestRunStage::Started,
            "finished" => TestRunStage::Finished,
            "stopped" => TestRunStage::Stopped,
            "error" => TestRunStage::Error,
            other => TestRunStage::Unknown(other.to_string()),
        }
    }

    /// Unknown stages map to `Pending`; a terminal state is never assumed.
    pub fn to_step_status(&self) -> StepStatus {
        match self {
            TestRunStage::Initialization | TestRunStage::Initialized => StepStatus::Pending,
            TestRunStage::Created | TestRunStage::Started => StepStatus::Running,
            TestRunStage::Finished => StepStatus::Completed,
            TestRunStage::Stopped => StepStatus::Cancelled,
            TestRunStage::Error => StepStatus::Failed,
            TestRunStage::Unknown(_) => StepStatus::Pending,
        }
    }
}

/// One replica backing a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerPod {
    pub name: String,
    pub phase: String,
}

impl RunnerPod {
    pub fn has_failed(&self) -> bool {
        matches!(self.phase.as_str(), "Failed" | "Error")
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn create_config(&self, config: &ScriptConfigMap) -> Result<(), BackendError>;

    /// The run references its config by name, so the config must exist first.
    async fn create_run(&self, run: &K6TestRun) -> Result<(), BackendError>;

    async fn get_status(&self, name: &str) -> Result<TestRunStage, BackendError>;

    async fn delete_run(&self, name: &str) -> Result<(), BackendError>;

    async fn delete_config(&self, name: &str) -> Result<(), BackendError>;

    async fn list_runner_pods(&self, name: &str) -> Result<Vec<RunnerPod>, BackendError>;

    async fn read_pod_logs(&self, pod: &str, tail_lines: u32) -> Result<String, BackendError>;

    /// Logs of every replica, each behind a `=== Container: <pod> ===` header.
    /// A replica that fails to answer contributes its error instead of
    /// aborting the whole read. `None` when no replica exists.
    async fn get_logs(&self, name: &str, max_lines: u32) -> Result<Option<String>, BackendError> {
        let pods = self.list_runner_pods(name).await?;
        if pods.is_empty() {
            return Ok(None);
        }

        let mut chunks = Vec::with_capacity(pods.len());
        for pod in &pods {
            match self.read_pod_logs(&pod.name, max_lines).await {
                Ok(text) => {
                    chunks.push(format!("\n=== Container: {} ===\n{}\n", pod.name, text));
                }
                Err(e) => {
                    warn!("Failed to read logs from pod {}: {}", pod.name, e);
                    chunks.push(format!(
                        "\n=== Container: {} (ERROR) ===\nFailed to retrieve logs: {}\n",
                        pod.name, e
                    ));
                }
            }
        }
        Ok(Some(chunks.join("\n")))
    }
}
