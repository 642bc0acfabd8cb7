//! Manifests submitted to the cluster: the script ConfigMap and the
//! k6-operator `TestRun` that references it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SCRIPT_FILE: &str = "test.js";
pub const K6_GROUP: &str = "k6.io";
pub const K6_VERSION: &str = "v1alpha1";
pub const K6_PLURAL: &str = "testruns";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfigMap {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, String>,
}

impl ScriptConfigMap {
    pub fn new(metadata: ObjectMeta, script: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(SCRIPT_FILE.to_string(), script.to_string());
        Self {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn script(&self) -> Option<&str> {
        self.data.get(SCRIPT_FILE).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K6TestRun {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: TestRunSpec,
}

impl K6TestRun {
    pub fn new(metadata: ObjectMeta, spec: TestRunSpec) -> Self {
        Self {
            api_version: format!("{}/{}", K6_GROUP, K6_VERSION),
            kind: "TestRun".to_string(),
            metadata,
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunSpec {
    pub parallelism: u32,
    pub script: ScriptSource,
    pub arguments: String,
    pub runner: RunnerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSource {
    pub config_map: ConfigMapRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapRef {
    pub name: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSpec {
    pub image: String,
    pub resources: ResourceRequirements,
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

impl ResourceRequirements {
    /// Requests and limits are kept equal.
    pub fn fixed(cpu: &str, memory: &str) -> Self {
        let list = ResourceList {
            cpu: cpu.to_string(),
            memory: memory.to_string(),
        };
        Self {
            requests: list.clone(),
            limits: list,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceList {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
