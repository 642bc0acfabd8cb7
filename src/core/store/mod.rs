//! SQLite persistence for teams, scenarios and test runs.

mod runs;
mod scenarios;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::orchestrator::{RunStatus, StepStatus};

pub use types::{
    NewRun, NewRunStep, NewScenario, NewStep, NewTeam, RunStep, Scenario, ScenarioStep,
    StepPatch, StepSyncUpdate, Team, TestRun,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// What the run orchestration core needs from persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_team(&self, team_id: &str) -> Result<Option<Team>, StoreError>;

    async fn get_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, StoreError>;

    /// Active steps of a scenario, ordered by `step_order`.
    async fn active_steps(&self, scenario_id: &str) -> Result<Vec<ScenarioStep>, StoreError>;

    /// Inserts a `PENDING` run with the next run number. Numbering and insert
    /// happen in one write transaction.
    async fn create_run(&self, new: &NewRun) -> Result<TestRun, StoreError>;

    async fn create_run_step(&self, new: &NewRunStep) -> Result<RunStep, StoreError>;

    async fn mark_step_running(&self, step_id: &str, handle: &str) -> Result<(), StoreError>;

    async fn mark_step_failed(&self, step_id: &str, message: &str) -> Result<(), StoreError>;

    /// Writes the aggregate status and the submitted handles. `started_at` is
    /// stamped when the run is `RUNNING`.
    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        handles: &[String],
    ) -> Result<TestRun, StoreError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<TestRun>, StoreError>;

    async fn run_steps(&self, run_id: &str) -> Result<Vec<RunStep>, StoreError>;

    async fn get_run_step(&self, step_id: &str) -> Result<Option<RunStep>, StoreError>;

    /// Steps the reconciler should look at: active ones with a handle, plus
    /// terminal ones still missing logs that ended inside the backfill window.
    async fn sync_candidates(&self, backfill_minutes: u32) -> Result<Vec<RunStep>, StoreError>;

    async fn apply_step_sync(
        &self,
        step_id: &str,
        update: &StepSyncUpdate,
    ) -> Result<(), StoreError>;

    async fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Invalid(format!("create {}: {}", parent.display(), e)))?;
        }
        let db = Connection::open(path)?;
        init_schema(&db)?;
        info!("Opened run database at {}", path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

fn init_schema(db: &Connection) -> Result<(), StoreError> {
    db.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS teams (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            environment_json TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS scenarios (
            id TEXT PRIMARY KEY,
            identifier TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS scenario_steps (
            id TEXT PRIMARY KEY,
            scenario_id TEXT NOT NULL REFERENCES scenarios(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            step_order INTEGER NOT NULL,
            step_type TEXT NOT NULL,
            config_json TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS test_runs (
            id TEXT PRIMARY KEY,
            run_number INTEGER NOT NULL,
            scenario_id TEXT NOT NULL REFERENCES scenarios(id),
            team_id TEXT NOT NULL REFERENCES teams(id),
            comment TEXT,
            created_by TEXT,
            parallelism INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL,
            k6_test_names TEXT NOT NULL DEFAULT '',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            completed_at DATETIME
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS test_run_steps (
            id TEXT PRIMARY KEY,
            test_run_id TEXT NOT NULL REFERENCES test_runs(id) ON DELETE CASCADE,
            scenario_step_id TEXT NOT NULL,
            step_name TEXT NOT NULL,
            step_order INTEGER NOT NULL,
            step_type TEXT NOT NULL,
            k6_test_name TEXT,
            status TEXT NOT NULL,
            error_message TEXT,
            container_logs TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            completed_at DATETIME,
            last_status_check DATETIME
        )",
        [],
    )?;

    db.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_scenario_steps_order ON scenario_steps(scenario_id, step_order)",
        [],
    )?;
    db.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_test_runs_number ON test_runs(run_number)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_runs_team_created ON test_runs(team_id, created_at)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_run_steps_run ON test_run_steps(test_run_id, step_order)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_run_steps_status ON test_run_steps(status)",
        [],
    )?;

    Ok(())
}

/// Maps a stored status string back into its enum inside a row closure.
pub(crate) fn status_column<T>(
    idx: usize,
    raw: String,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown status '{}'", raw).into(),
        )
    })
}

pub(crate) fn run_status_column(idx: usize, raw: String) -> rusqlite::Result<RunStatus> {
    status_column(idx, raw, RunStatus::from_status)
}

pub(crate) fn step_status_column(idx: usize, raw: String) -> rusqlite::Result<StepStatus> {
    status_column(idx, raw, StepStatus::from_status)
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::orchestrator::StepKind;

    pub(crate) async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("loadrun.db")).await.unwrap();
        (dir, store)
    }

    pub(crate) async fn seed_team(store: &SqliteStore, slug: &str) -> Team {
        let mut environment = BTreeMap::new();
        environment.insert("BASE_URL".to_string(), format!("https://{}.example.com", slug));
        store
            .create_team(&NewTeam {
                slug: slug.to_string(),
                name: slug.to_uppercase(),
                environment,
            })
            .await
            .unwrap()
    }

    pub(crate) async fn seed_scenario(store: &SqliteStore, identifier: &str) -> Scenario {
        store
            .create_scenario(&NewScenario {
                identifier: identifier.to_string(),
                name: format!("{} scenario", identifier),
                description: None,
            })
            .await
            .unwrap()
    }

    pub(crate) async fn seed_step(
        store: &SqliteStore,
        scenario_id: &str,
        name: &str,
        kind: StepKind,
    ) -> ScenarioStep {
        store
            .add_step(
                scenario_id,
                &NewStep {
                    name: name.to_string(),
                    description: None,
                    step_order: None,
                    kind,
                    is_active: true,
                },
            )
            .await
            .unwrap()
    }

    pub(crate) fn script(text: &str) -> StepKind {
        StepKind::Script {
            script: text.to_string(),
        }
    }
}
