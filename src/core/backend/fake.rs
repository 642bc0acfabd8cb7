use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BackendError, ExecutionBackend, K6TestRun, RunnerPod, ScriptConfigMap, TestRunStage};

/// In-memory backend recording every call, with per-name failure switches.
#[derive(Default)]
pub(crate) struct FakeBackend {
    inner: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    configs: HashMap<String, ScriptConfigMap>,
    runs: HashMap<String, K6TestRun>,
    stages: HashMap<String, String>,
    pods: HashMap<String, Vec<RunnerPod>>,
    pod_logs: HashMap<String, String>,
    failing_runs: HashSet<String>,
    unavailable: bool,
    calls: Vec<String>,
}

impl FakeBackend {
    /// `create_run` fails for any run whose name contains `fragment`.
    pub(crate) fn fail_runs_containing(&self, fragment: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_runs
            .insert(fragment.to_string());
    }

    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    pub(crate) fn set_stage(&self, name: &str, stage: &str) {
        self.inner
            .lock()
            .unwrap()
            .stages
            .insert(name.to_string(), stage.to_string());
    }

    pub(crate) fn forget_run(&self, name: &str) {
        let mut state = self.inner.lock().unwrap();
        state.runs.remove(name);
        state.stages.remove(name);
    }

    pub(crate) fn set_pods(&self, name: &str, pods: Vec<RunnerPod>) {
        self.inner
            .lock()
            .unwrap()
            .pods
            .insert(name.to_string(), pods);
    }

    pub(crate) fn set_pod_logs(&self, pod: &str, text: &str) {
        self.inner
            .lock()
            .unwrap()
            .pod_logs
            .insert(pod.to_string(), text.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn run(&self, name: &str) -> Option<K6TestRun> {
        self.inner.lock().unwrap().runs.get(name).cloned()
    }

    pub(crate) fn config(&self, name: &str) -> Option<ScriptConfigMap> {
        self.inner.lock().unwrap().configs.get(name).cloned()
    }

    pub(crate) fn run_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().unwrap().runs.keys().cloned().collect();
        names.sort();
        names
    }
}

fn already_exists(resource: &str, name: &str) -> BackendError {
    BackendError::Api {
        status: 409,
        message: format!("{} \"{}\" already exists", resource, name),
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn create_config(&self, config: &ScriptConfigMap) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(format!("create_config:{}", config.name()));
        if state.unavailable {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if state.configs.contains_key(config.name()) {
            return Err(already_exists("configmaps", config.name()));
        }
        state
            .configs
            .insert(config.name().to_string(), config.clone());
        Ok(())
    }

    async fn create_run(&self, run: &K6TestRun) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(format!("create_run:{}", run.name()));
        if state.unavailable {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if state
            .failing_runs
            .iter()
            .any(|fragment| run.name().contains(fragment.as_str()))
        {
            return Err(BackendError::Api {
                status: 422,
                message: format!("admission webhook denied {}", run.name()),
            });
        }
        if state.runs.contains_key(run.name()) {
            return Err(already_exists("testruns.k6.io", run.name()));
        }
        state.runs.insert(run.name().to_string(), run.clone());
        Ok(())
    }

    async fn get_status(&self, name: &str) -> Result<TestRunStage, BackendError> {
        let state = self.inner.lock().unwrap();
        if state.unavailable {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if let Some(stage) = state.stages.get(name) {
            return Ok(TestRunStage::parse(stage));
        }
        if state.runs.contains_key(name) {
            return Ok(TestRunStage::Initialization);
        }
        Err(BackendError::NotFound {
            kind: "TestRun",
            name: name.to_string(),
        })
    }

    async fn delete_run(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(format!("delete_run:{}", name));
        match state.runs.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound {
                kind: "TestRun",
                name: name.to_string(),
            }),
        }
    }

    async fn delete_config(&self, name: &str) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(format!("delete_config:{}", name));
        match state.configs.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound {
                kind: "ConfigMap",
                name: name.to_string(),
            }),
        }
    }

    async fn list_runner_pods(&self, name: &str) -> Result<Vec<RunnerPod>, BackendError> {
        let state = self.inner.lock().unwrap();
        if state.unavailable {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(state.pods.get(name).cloned().unwrap_or_default())
    }

    async fn read_pod_logs(&self, pod: &str, _tail_lines: u32) -> Result<String, BackendError> {
        let state = self.inner.lock().unwrap();
        state
            .pod_logs
            .get(pod)
            .cloned()
            .ok_or_else(|| BackendError::Api {
                status: 400,
                message: format!("container in pod {} is waiting to start", pod),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::backend::resources::{
        ConfigMapRef, ObjectMeta, ResourceRequirements, RunnerSpec, ScriptSource, TestRunSpec,
    };

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            namespace: "k6-runs".to_string(),
            labels: BTreeMap::new(),
        }
    }

    fn test_run(name: &str) -> K6TestRun {
        K6TestRun::new(
            meta(name),
            TestRunSpec {
                parallelism: 1,
                script: ScriptSource {
                    config_map: ConfigMapRef {
                        name: format!("{}-config", name),
                        file: "test.js".to_string(),
                    },
                },
                arguments: String::new(),
                runner: RunnerSpec {
                    image: "grafana/k6:latest".to_string(),
                    resources: ResourceRequirements::fixed("500m", "512Mi"),
                    env: Vec::new(),
                },
            },
        )
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_like_the_api_server() {
        let backend = FakeBackend::default();
        let config = ScriptConfigMap::new(meta("alpha-smoke-login-1-config"), "first");
        backend.create_config(&config).await.unwrap();
        let again = ScriptConfigMap::new(meta("alpha-smoke-login-1-config"), "second");
        match backend.create_config(&again).await {
            Err(BackendError::Api { status: 409, .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(
            backend.config("alpha-smoke-login-1-config").unwrap().script(),
            Some("first")
        );

        backend.create_run(&test_run("alpha-smoke-login-1")).await.unwrap();
        match backend.create_run(&test_run("alpha-smoke-login-1")).await {
            Err(BackendError::Api { status: 409, .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(backend.run_names(), vec!["alpha-smoke-login-1".to_string()]);
    }
}
