mod reconciler;

use std::sync::Arc;

use crate::core::backend::fake::FakeBackend;
use crate::core::orchestrator::{
    ParallelismLimits, ReconcilerSettings, RunCoordinator, RunRequest, RunnerSettings,
    StatusReconciler, StepExecutor, StepKind, TriggerSource,
};
use crate::core::store::test_support::{seed_scenario, seed_step, seed_team, temp_store};
use crate::core::store::{RunStore, Scenario, SqliteStore, Team};

pub(super) struct Harness {
    _dir: tempfile::TempDir,
    pub store: Arc<SqliteStore>,
    pub backend: Arc<FakeBackend>,
    pub coordinator: RunCoordinator,
    pub reconciler: StatusReconciler,
    pub team: Team,
    pub scenario: Scenario,
}

impl Harness {
    pub async fn new() -> Self {
        let (dir, store) = temp_store().await;
        let team = seed_team(&store, "alpha").await;
        let scenario = seed_scenario(&store, "smoke").await;
        let store = Arc::new(store);
        let backend = Arc::new(FakeBackend::default());
        Self::assemble(dir, store.clone(), store, backend, team, scenario)
    }

    /// Same wiring, but the coordinator talks to `run_store`.
    pub fn assemble(
        dir: tempfile::TempDir,
        store: Arc<SqliteStore>,
        run_store: Arc<dyn RunStore>,
        backend: Arc<FakeBackend>,
        team: Team,
        scenario: Scenario,
    ) -> Self {
        let executor = StepExecutor::new(backend.clone(), RunnerSettings::default());
        let coordinator =
            RunCoordinator::new(run_store, executor, ParallelismLimits::default());
        let reconciler =
            StatusReconciler::new(store.clone(), backend.clone(), ReconcilerSettings::default());
        Self {
            _dir: dir,
            store,
            backend,
            coordinator,
            reconciler,
            team,
            scenario,
        }
    }

    pub async fn step(&self, name: &str, kind: StepKind) {
        seed_step(&self.store, &self.scenario.id, name, kind).await;
    }

    pub fn organizer_request(&self) -> RunRequest {
        RunRequest {
            scenario_id: self.scenario.id.clone(),
            team_id: self.team.id.clone(),
            comment: Some("baseline".to_string()),
            parallelism: None,
            source: TriggerSource::Organizer,
        }
    }

    pub fn participant_request(&self, parallelism: u32) -> RunRequest {
        RunRequest {
            parallelism: Some(parallelism),
            source: TriggerSource::Participant {
                creator_id: "participant-7".to_string(),
            },
            ..self.organizer_request()
        }
    }
}

pub(super) fn script(text: &str) -> StepKind {
    StepKind::Script {
        script: text.to_string(),
    }
}

pub(super) fn http(url: &str) -> StepKind {
    StepKind::HttpCheck {
        url: url.to_string(),
        delay_secs: None,
    }
}
