//! Kubernetes REST adapter for the k6 operator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::resources::{K6_GROUP, K6_PLURAL, K6_VERSION};
use super::{BackendError, ExecutionBackend, K6TestRun, RunnerPod, ScriptConfigMap, TestRunStage};
use crate::core::config::ClusterConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KubeBackend {
    client: Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
}

#[derive(Deserialize, Default)]
struct TestRunObject {
    #[serde(default)]
    status: Option<TestRunStatusField>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TestRunStatusField {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    job_name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Deserialize, Default)]
struct PodItem {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
struct PodMetadata {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: Option<String>,
}

impl KubeBackend {
    pub async fn connect(config: &ClusterConfig) -> Result<Self, BackendError> {
        let base_url = config
            .resolve_api_url()
            .ok_or_else(|| {
                BackendError::Config(
                    "no cluster.api_url configured and KUBERNETES_SERVICE_HOST is not set"
                        .to_string(),
                )
            })?
            .trim_end_matches('/')
            .to_string();

        let token = match &config.token_path {
            Some(path) if path.exists() => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| BackendError::Config(format!("read {}: {}", path.display(), e)))?
                    .trim()
                    .to_string(),
            ),
            _ => None,
        };

        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify);
        if let Some(path) = config.ca_path.as_ref().filter(|p| p.exists()) {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|e| BackendError::Config(format!("read {}: {}", path.display(), e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| BackendError::Config(format!("invalid CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        info!(
            "Kubernetes backend ready: api={}, namespace={}, token={}",
            base_url,
            config.namespace,
            token.is_some()
        );

        Ok(Self {
            client,
            base_url,
            namespace: config.namespace.clone(),
            token,
        })
    }

    fn config_maps_url(&self) -> String {
        format!(
            "{}/api/v1/namespaces/{}/configmaps",
            self.base_url, self.namespace
        )
    }

    fn test_runs_url(&self) -> String {
        format!(
            "{}/apis/{}/{}/namespaces/{}/{}",
            self.base_url, K6_GROUP, K6_VERSION, self.namespace, K6_PLURAL
        )
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        kind: &'static str,
        name: &str,
    ) -> Result<Response, BackendError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiStatus>(&body)
            .ok()
            .and_then(|s| s.message)
            .unwrap_or(body);
        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch_test_run(&self, name: &str) -> Result<TestRunStatusField, BackendError> {
        let url = format!("{}/{}", self.test_runs_url(), name);
        let response = self.send(self.client.get(url), "TestRun", name).await?;
        let object: TestRunObject = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("decode TestRun {}: {}", name, e)))?;
        Ok(object.status.unwrap_or_default())
    }

    async fn pods_with_selector(
        &self,
        selector: Option<&str>,
    ) -> Result<Vec<PodItem>, BackendError> {
        let mut request = self.client.get(self.pods_url());
        if let Some(selector) = selector {
            request = request.query(&[("labelSelector", selector)]);
        }
        let response = self.send(request, "PodList", &self.namespace).await?;
        let list: PodList = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("decode PodList: {}", e)))?;
        Ok(list.items)
    }
}

fn into_runner_pods(items: Vec<PodItem>) -> Vec<RunnerPod> {
    items
        .into_iter()
        .filter_map(|pod| {
            let name = pod.metadata.name?;
            Some(RunnerPod {
                name,
                phase: pod.status.phase.unwrap_or_else(|| "Unknown".to_string()),
            })
        })
        .collect()
}

#[async_trait]
impl ExecutionBackend for KubeBackend {
    async fn create_config(&self, config: &ScriptConfigMap) -> Result<(), BackendError> {
        let request = self.client.post(self.config_maps_url()).json(config);
        self.send(request, "ConfigMap", config.name()).await?;
        debug!("Created ConfigMap {}", config.name());
        Ok(())
    }

    async fn create_run(&self, run: &K6TestRun) -> Result<(), BackendError> {
        let request = self.client.post(self.test_runs_url()).json(run);
        self.send(request, "TestRun", run.name()).await?;
        debug!("Created TestRun {}", run.name());
        Ok(())
    }

    async fn get_status(&self, name: &str) -> Result<TestRunStage, BackendError> {
        let status = self.fetch_test_run(name).await?;
        Ok(TestRunStage::parse(status.stage.as_deref().unwrap_or("")))
    }

    async fn delete_run(&self, name: &str) -> Result<(), BackendError> {
        let url = format!("{}/{}", self.test_runs_url(), name);
        self.send(self.client.delete(url), "TestRun", name).await?;
        Ok(())
    }

    async fn delete_config(&self, name: &str) -> Result<(), BackendError> {
        let url = format!("{}/{}", self.config_maps_url(), name);
        self.send(self.client.delete(url), "ConfigMap", name).await?;
        Ok(())
    }

    /// Replicas are found by the job the operator reports, then by the
    /// operator's `k6_cr` label, then by name prefix as a last resort.
    async fn list_runner_pods(&self, name: &str) -> Result<Vec<RunnerPod>, BackendError> {
        match self.fetch_test_run(name).await {
            Ok(TestRunStatusField {
                job_name: Some(job),
                ..
            }) => match self
                .pods_with_selector(Some(&format!("job-name={}", job)))
                .await
            {
                Ok(items) if !items.is_empty() => return Ok(into_runner_pods(items)),
                Ok(_) => {}
                Err(e) => warn!("Pod lookup by job-name={} failed: {}", job, e),
            },
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Could not read TestRun {} for pod lookup: {}", name, e),
        }

        match self
            .pods_with_selector(Some(&format!("k6_cr={}", name)))
            .await
        {
            Ok(items) if !items.is_empty() => return Ok(into_runner_pods(items)),
            Ok(_) => {}
            Err(e) => warn!("Pod lookup by k6_cr={} failed: {}", name, e),
        }

        let prefix = format!("{}-", name);
        let items = self.pods_with_selector(None).await?;
        Ok(into_runner_pods(
            items
                .into_iter()
                .filter(|pod| {
                    pod.metadata
                        .name
                        .as_deref()
                        .is_some_and(|pod_name| pod_name.starts_with(&prefix))
                })
                .collect(),
        ))
    }

    async fn read_pod_logs(&self, pod: &str, tail_lines: u32) -> Result<String, BackendError> {
        let url = format!("{}/{}/log", self.pods_url(), pod);
        let request = self.client.get(url).query(&[
            ("tailLines", tail_lines.to_string()),
            ("timestamps", "true".to_string()),
        ]);
        let response = self.send(request, "Pod", pod).await?;
        response
            .text()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}
