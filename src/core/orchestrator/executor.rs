use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::OrchestratorError;
use super::naming::{config_map_name, sanitize_segment, test_run_name};
use crate::core::backend::resources::{
    ConfigMapRef, EnvVar, ObjectMeta, ResourceRequirements, RunnerSpec, SCRIPT_FILE, ScriptSource,
    TestRunSpec,
};
use crate::core::backend::{ExecutionBackend, K6TestRun, ScriptConfigMap};
use crate::core::config::{ClusterConfig, RunnerConfig};

/// Everything needed to launch one step as an isolated execution.
#[derive(Debug, Clone)]
pub struct StepSubmission {
    pub team_slug: String,
    pub scenario_identifier: String,
    pub step_name: String,
    pub step_order: i64,
    pub run_number: i64,
    pub script: String,
    pub parallelism: u32,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub namespace: String,
    pub image: String,
    pub cpu: String,
    pub memory: String,
    pub prometheus_rw_url: String,
    pub push_interval: String,
    pub trend_as_native_histogram: bool,
}

impl RunnerSettings {
    pub fn from_config(cluster: &ClusterConfig, runner: &RunnerConfig) -> Self {
        Self {
            namespace: cluster.namespace.clone(),
            image: runner.image.clone(),
            cpu: runner.cpu.clone(),
            memory: runner.memory.clone(),
            prometheus_rw_url: runner.prometheus_rw_url.clone(),
            push_interval: runner.push_interval.clone(),
            trend_as_native_histogram: runner.trend_as_native_histogram,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default(), &RunnerConfig::default())
    }
}

/// Stateless translator from a step submission to backend resources.
#[derive(Clone)]
pub struct StepExecutor {
    backend: Arc<dyn ExecutionBackend>,
    settings: RunnerSettings,
}

impl StepExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>, settings: RunnerSettings) -> Self {
        Self { backend, settings }
    }

    /// Creates the script config, then the test run referencing it. Returns
    /// the backend handle name.
    pub async fn submit(&self, submission: &StepSubmission) -> Result<String, OrchestratorError> {
        let name = test_run_name(
            &submission.team_slug,
            &submission.scenario_identifier,
            &submission.step_name,
            submission.run_number,
        );
        let config_name = config_map_name(&name);
        let labels = self.labels(submission, &name);

        let config = ScriptConfigMap::new(
            ObjectMeta {
                name: config_name.clone(),
                namespace: self.settings.namespace.clone(),
                labels: labels.clone(),
            },
            &submission.script,
        );
        self.backend
            .create_config(&config)
            .await
            .map_err(|e| OrchestratorError::Provisioning(e.to_string()))?;
        debug!("Script config {} stored", config_name);

        let run = self.build_run(submission, &name, &config_name, labels);
        if let Err(e) = self.backend.create_run(&run).await {
            // Nothing else tracks this config once the step fails.
            if let Err(cleanup) = self.backend.delete_config(&config_name).await {
                warn!("Could not remove script config {}: {}", config_name, cleanup);
            }
            return Err(OrchestratorError::Provisioning(e.to_string()));
        }

        info!(
            "Submitted test run {} (parallelism {})",
            name, submission.parallelism
        );
        Ok(name)
    }

    fn labels(&self, submission: &StepSubmission, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "k6".to_string()),
            ("testrun".to_string(), name.to_string()),
            ("team".to_string(), submission.team_slug.clone()),
            (
                "scenario".to_string(),
                submission.scenario_identifier.clone(),
            ),
            ("step".to_string(), sanitize_segment(&submission.step_name)),
            ("stepOrder".to_string(), submission.step_order.to_string()),
        ])
    }

    fn build_run(
        &self,
        submission: &StepSubmission,
        name: &str,
        config_name: &str,
        labels: BTreeMap<String, String>,
    ) -> K6TestRun {
        let arguments = [
            "--out experimental-prometheus-rw".to_string(),
            format!("--tag team={}", submission.team_slug),
            format!("--tag test_scenario={}", submission.scenario_identifier),
            format!("--tag step={}", sanitize_segment(&submission.step_name)),
            format!("--tag step_order={}", submission.step_order),
            format!("--tag testid={}", name),
            format!("--tag run_number={}", submission.run_number),
        ]
        .join(" ");

        K6TestRun::new(
            ObjectMeta {
                name: name.to_string(),
                namespace: self.settings.namespace.clone(),
                labels,
            },
            TestRunSpec {
                parallelism: submission.parallelism,
                script: ScriptSource {
                    config_map: ConfigMapRef {
                        name: config_name.to_string(),
                        file: SCRIPT_FILE.to_string(),
                    },
                },
                arguments,
                runner: RunnerSpec {
                    image: self.settings.image.clone(),
                    resources: ResourceRequirements::fixed(
                        &self.settings.cpu,
                        &self.settings.memory,
                    ),
                    env: self.runner_env(&submission.env),
                },
            },
        )
    }

    /// Telemetry settings first, then the team's own variables. A team
    /// variable never shadows a telemetry one.
    fn runner_env(&self, team_env: &BTreeMap<String, String>) -> Vec<EnvVar> {
        let mut env = vec![
            EnvVar::new(
                "K6_PROMETHEUS_RW_SERVER_URL",
                self.settings.prometheus_rw_url.clone(),
            ),
            EnvVar::new(
                "K6_PROMETHEUS_RW_TREND_AS_NATIVE_HISTOGRAM",
                self.settings.trend_as_native_histogram.to_string(),
            ),
            EnvVar::new(
                "K6_PROMETHEUS_RW_PUSH_INTERVAL",
                self.settings.push_interval.clone(),
            ),
        ];
        let reserved: HashSet<String> = env.iter().map(|var| var.name.clone()).collect();
        env.extend(
            team_env
                .iter()
                .filter(|(key, _)| !reserved.contains(key.as_str()))
                .map(|(key, value)| EnvVar::new(key.clone(), value.clone())),
        );
        env
    }
}
