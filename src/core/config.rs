use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::orchestrator::ParallelismLimits;

pub const CONFIG_ENV: &str = "LOADRUN_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "loadrun.toml";

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const DEFAULT_PROMETHEUS_RW_URL: &str = "http://prometheus-kube-prometheus-prometheus.telemetry.svc.cluster.local:9090/prometheus/api/v1/write";

/// Sync intervals outside this range fall back to the default.
const SYNC_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 5..=300;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Kubernetes API base URL. Falls back to the in-cluster service address.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_token_path")]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_ca_path")]
    pub ca_path: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_prometheus_rw_url")]
    pub prometheus_rw_url: String,
    #[serde(default = "default_push_interval")]
    pub push_interval: String,
    #[serde(default = "default_true")]
    pub trend_as_native_histogram: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_organizer_max")]
    pub organizer_max_parallelism: u32,
    #[serde(default = "default_participant_max")]
    pub participant_max_parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_sync_interval")]
    pub interval_seconds: u64,
    /// How long after completion a step is still revisited for missing logs.
    #[serde(default = "default_backfill_minutes")]
    pub log_backfill_minutes: u32,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loadrun")
        .join("loadrun.db")
}
fn default_namespace() -> String {
    "k6-runs".to_string()
}
fn default_token_path() -> Option<PathBuf> {
    Some(Path::new(SERVICE_ACCOUNT_DIR).join("token"))
}
fn default_ca_path() -> Option<PathBuf> {
    Some(Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt"))
}
fn default_image() -> String {
    "grafana/k6:latest".to_string()
}
fn default_cpu() -> String {
    "500m".to_string()
}
fn default_memory() -> String {
    "512Mi".to_string()
}
fn default_prometheus_rw_url() -> String {
    DEFAULT_PROMETHEUS_RW_URL.to_string()
}
fn default_push_interval() -> String {
    "5s".to_string()
}
fn default_true() -> bool {
    true
}
fn default_organizer_max() -> u32 {
    ParallelismLimits::default().organizer_max
}
fn default_participant_max() -> u32 {
    ParallelismLimits::default().participant_max
}
fn default_sync_interval() -> u64 {
    20
}
fn default_backfill_minutes() -> u32 {
    120
}
fn default_log_tail_lines() -> u32 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            namespace: default_namespace(),
            token_path: default_token_path(),
            ca_path: default_ca_path(),
            insecure_skip_tls_verify: false,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            cpu: default_cpu(),
            memory: default_memory(),
            prometheus_rw_url: default_prometheus_rw_url(),
            push_interval: default_push_interval(),
            trend_as_native_histogram: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            organizer_max_parallelism: default_organizer_max(),
            participant_max_parallelism: default_participant_max(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_sync_interval(),
            log_backfill_minutes: default_backfill_minutes(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ClusterConfig {
    pub fn resolve_api_url(&self) -> Option<String> {
        self.resolve_api_url_with(|key| std::env::var(key).ok())
    }

    fn resolve_api_url_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = self.api_url.as_ref().filter(|u| !u.trim().is_empty()) {
            return Some(url.clone());
        }
        let host = lookup("KUBERNETES_SERVICE_HOST")?;
        let port = lookup("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| "443".to_string());
        if host.contains(':') {
            Some(format!("https://[{}]:{}", host, port))
        } else {
            Some(format!("https://{}:{}", host, port))
        }
    }
}

impl LimitsConfig {
    pub fn parallelism(&self) -> ParallelismLimits {
        ParallelismLimits {
            organizer_max: self.organizer_max_parallelism,
            participant_max: self.participant_max_parallelism,
        }
    }
}

impl AppConfig {
    /// Reads the config file if it exists, then applies environment overrides.
    /// `explicit` (from `--config`) must exist; the env or default path may not.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => (PathBuf::from(p), true),
                _ => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
            },
        };

        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            config
        } else if required {
            anyhow::bail!("config file {} does not exist", path.display());
        } else {
            AppConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cpu) = lookup("K6_RESOURCE_CPU").filter(|v| !v.is_empty()) {
            self.runner.cpu = cpu;
        }
        if let Some(memory) = lookup("K6_RESOURCE_MEMORY").filter(|v| !v.is_empty()) {
            self.runner.memory = memory;
        }
        if let Some(path) = lookup("LOADRUN_DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("K6_SYNC_INTERVAL_SECONDS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if SYNC_INTERVAL_RANGE.contains(&secs) => {
                    self.sync.interval_seconds = secs;
                }
                _ => warn!(
                    "Ignoring K6_SYNC_INTERVAL_SECONDS={} (expected {}..={})",
                    raw,
                    SYNC_INTERVAL_RANGE.start(),
                    SYNC_INTERVAL_RANGE.end()
                ),
            }
        }
    }

    fn validate(&mut self) -> Result<()> {
        if !SYNC_INTERVAL_RANGE.contains(&self.sync.interval_seconds) {
            warn!(
                "sync.interval_seconds={} out of range, using {}",
                self.sync.interval_seconds,
                default_sync_interval()
            );
            self.sync.interval_seconds = default_sync_interval();
        }
        if self.limits.organizer_max_parallelism == 0 || self.limits.participant_max_parallelism == 0
        {
            anyhow::bail!("parallelism limits must be at least 1");
        }
        if self.sync.log_tail_lines == 0 {
            self.sync.log_tail_lines = default_log_tail_lines();
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_cluster_conventions() {
        let config = AppConfig::default();
        assert_eq!(config.cluster.namespace, "k6-runs");
        assert_eq!(config.runner.image, "grafana/k6:latest");
        assert_eq!(config.runner.cpu, "500m");
        assert_eq!(config.runner.memory, "512Mi");
        assert_eq!(config.runner.push_interval, "5s");
        assert_eq!(config.sync.interval_seconds, 20);
        assert_eq!(config.sync.log_backfill_minutes, 120);
        assert_eq!(config.limits.parallelism(), ParallelismLimits::default());
    }

    #[test]
    fn parse_partial_toml() {
        let content = r#"
[server]
port = 9000

[cluster]
api_url = "https://10.0.0.1:6443"
namespace = "load"

[limits]
participant_max_parallelism = 3
"#;
        let config: AppConfig = toml::from_str(content).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.cluster.namespace, "load");
        assert_eq!(config.limits.participant_max_parallelism, 3);
        assert_eq!(config.limits.organizer_max_parallelism, 10);
        assert_eq!(config.runner.memory, "512Mi");
    }

    #[test]
    fn env_overrides_resources_and_database() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("K6_RESOURCE_CPU", "1"),
            ("K6_RESOURCE_MEMORY", "1Gi"),
            ("LOADRUN_DATABASE_PATH", "/tmp/x.db"),
        ]));
        assert_eq!(config.runner.cpu, "1");
        assert_eq!(config.runner.memory, "1Gi");
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn sync_interval_env_is_range_checked() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("K6_SYNC_INTERVAL_SECONDS", "60")]));
        assert_eq!(config.sync.interval_seconds, 60);

        for bad in ["4", "301", "soon", ""] {
            let mut config = AppConfig::default();
            config.apply_env(env(&[("K6_SYNC_INTERVAL_SECONDS", bad)]));
            assert_eq!(config.sync.interval_seconds, 20, "value {:?}", bad);
        }
    }

    #[test]
    fn api_url_prefers_config_then_service_env() {
        let mut cluster = ClusterConfig::default();
        assert_eq!(cluster.resolve_api_url_with(env(&[])), None);
        assert_eq!(
            cluster
                .resolve_api_url_with(env(&[("KUBERNETES_SERVICE_HOST", "10.96.0.1")]))
                .as_deref(),
            Some("https://10.96.0.1:443")
        );
        assert_eq!(
            cluster
                .resolve_api_url_with(env(&[
                    ("KUBERNETES_SERVICE_HOST", "fd00::1"),
                    ("KUBERNETES_SERVICE_PORT", "6443")
                ]))
                .as_deref(),
            Some("https://[fd00::1]:6443")
        );

        cluster.api_url = Some("http://localhost:8001".to_string());
        assert_eq!(
            cluster
                .resolve_api_url_with(env(&[("KUBERNETES_SERVICE_HOST", "10.96.0.1")]))
                .as_deref(),
            Some("http://localhost:8001")
        );
    }

    #[tokio::test]
    async fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loadrun.toml");
        std::fs::write(&path, "[sync]\ninterval_seconds = 2\nlog_tail_lines = 50\n").unwrap();
        let config = AppConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.sync.interval_seconds, 20);
        assert_eq!(config.sync.log_tail_lines, 50);
    }

    #[tokio::test]
    async fn load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(&missing)).await.is_err());
    }
}
