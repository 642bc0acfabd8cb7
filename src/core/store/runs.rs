use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::types::{NewRun, NewRunStep, RunStep, Scenario, ScenarioStep, StepSyncUpdate, Team, TestRun};
use super::{RunStore, SqliteStore, StoreError, run_status_column, step_status_column};
use crate::core::orchestrator::{RunStatus, StepStatus};

const RUN_COLUMNS: &str = "id, run_number, scenario_id, team_id, comment, created_by, parallelism, status, \
     k6_test_names, created_at, started_at, completed_at";
const RUN_STEP_COLUMNS: &str = "id, test_run_id, scenario_step_id, step_name, step_order, step_type, \
     k6_test_name, status, error_message, container_logs, started_at, completed_at, last_status_check";

fn run_from_row(row: &Row) -> rusqlite::Result<TestRun> {
    let names: String = row.get(8)?;
    Ok(TestRun {
        id: row.get(0)?,
        run_number: row.get(1)?,
        scenario_id: row.get(2)?,
        team_id: row.get(3)?,
        comment: row.get(4)?,
        created_by: row.get(5)?,
        parallelism: row.get(6)?,
        status: run_status_column(7, row.get(7)?)?,
        k6_test_names: names
            .split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect(),
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

fn run_step_from_row(row: &Row) -> rusqlite::Result<RunStep> {
    Ok(RunStep {
        id: row.get(0)?,
        test_run_id: row.get(1)?,
        scenario_step_id: row.get(2)?,
        step_name: row.get(3)?,
        step_order: row.get(4)?,
        step_type: row.get(5)?,
        k6_test_name: row.get(6)?,
        status: step_status_column(7, row.get(7)?)?,
        error_message: row.get(8)?,
        container_logs: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
        last_status_check: row.get(12)?,
    })
}

fn load_run(db: &Connection, run_id: &str) -> Result<Option<TestRun>, StoreError> {
    let sql = format!("SELECT {} FROM test_runs WHERE id = ?1", RUN_COLUMNS);
    Ok(db.query_row(&sql, params![run_id], run_from_row).optional()?)
}

fn load_run_step(db: &Connection, step_id: &str) -> Result<Option<RunStep>, StoreError> {
    let sql = format!("SELECT {} FROM test_run_steps WHERE id = ?1", RUN_STEP_COLUMNS);
    Ok(db
        .query_row(&sql, params![step_id], run_step_from_row)
        .optional()?)
}

fn collect_run_steps(
    db: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<RunStep>, StoreError> {
    let mut stmt = db.prepare(sql)?;
    let rows = stmt.query_map(params, run_step_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl SqliteStore {
    /// Runs of a team, newest first. `participant_only` keeps runs that carry
    /// a creator.
    pub async fn list_team_runs(
        &self,
        team_id: &str,
        participant_only: bool,
    ) -> Result<Vec<TestRun>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM test_runs WHERE team_id = ?1 {} ORDER BY run_number DESC",
            RUN_COLUMNS,
            if participant_only {
                "AND created_by IS NOT NULL"
            } else {
                ""
            }
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![team_id], run_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn get_team(&self, team_id: &str) -> Result<Option<Team>, StoreError> {
        self.find_team(team_id).await
    }

    async fn get_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, StoreError> {
        self.find_scenario(scenario_id).await
    }

    async fn active_steps(&self, scenario_id: &str) -> Result<Vec<ScenarioStep>, StoreError> {
        self.list_active_steps(scenario_id).await
    }

    async fn create_run(&self, new: &NewRun) -> Result<TestRun, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let run_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(run_number), 0) + 1 FROM test_runs",
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO test_runs (id, run_number, scenario_id, team_id, comment, created_by, parallelism, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                run_number,
                new.scenario_id,
                new.team_id,
                new.comment,
                new.created_by,
                new.parallelism,
                RunStatus::Pending.as_str()
            ],
        )?;
        let run = load_run(&tx, &id)?.ok_or_else(|| StoreError::not_found("run", &id))?;
        tx.commit()?;
        Ok(run)
    }

    async fn create_run_step(&self, new: &NewRunStep) -> Result<RunStep, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO test_run_steps (id, test_run_id, scenario_step_id, step_name, step_order, step_type, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                new.test_run_id,
                new.scenario_step_id,
                new.step_name,
                new.step_order,
                new.step_type,
                StepStatus::Pending.as_str()
            ],
        )?;
        load_run_step(&db, &id)?.ok_or_else(|| StoreError::not_found("run step", &id))
    }

    async fn mark_step_running(&self, step_id: &str, handle: &str) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE test_run_steps SET status = ?1, k6_test_name = ?2, started_at = CURRENT_TIMESTAMP WHERE id = ?3",
            params![StepStatus::Running.as_str(), handle, step_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run step", step_id));
        }
        Ok(())
    }

    async fn mark_step_failed(&self, step_id: &str, message: &str) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE test_run_steps SET status = ?1, error_message = ?2, completed_at = CURRENT_TIMESTAMP WHERE id = ?3",
            params![StepStatus::Failed.as_str(), message, step_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run step", step_id));
        }
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: &str,
        status: RunStatus,
        handles: &[String],
    ) -> Result<TestRun, StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE test_runs
             SET status = ?1, k6_test_names = ?2,
                 started_at = CASE WHEN ?1 = 'RUNNING' THEN CURRENT_TIMESTAMP ELSE started_at END
             WHERE id = ?3",
            params![status.as_str(), handles.join(","), run_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run", run_id));
        }
        load_run(&db, run_id)?.ok_or_else(|| StoreError::not_found("run", run_id))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<TestRun>, StoreError> {
        let db = self.db.lock().await;
        load_run(&db, run_id)
    }

    async fn run_steps(&self, run_id: &str) -> Result<Vec<RunStep>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM test_run_steps WHERE test_run_id = ?1 ORDER BY step_order ASC",
            RUN_STEP_COLUMNS
        );
        collect_run_steps(&db, &sql, params![run_id])
    }

    async fn get_run_step(&self, step_id: &str) -> Result<Option<RunStep>, StoreError> {
        let db = self.db.lock().await;
        load_run_step(&db, step_id)
    }

    async fn sync_candidates(&self, backfill_minutes: u32) -> Result<Vec<RunStep>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM test_run_steps
             WHERE k6_test_name IS NOT NULL AND k6_test_name != ''
               AND (status IN ('PENDING', 'RUNNING')
                    OR (status != 'DELETED'
                        AND container_logs IS NULL
                        AND completed_at IS NOT NULL
                        AND completed_at >= datetime('now', ?1)))
             ORDER BY test_run_id, step_order ASC",
            RUN_STEP_COLUMNS
        );
        collect_run_steps(
            &db,
            &sql,
            params![format!("-{} minutes", backfill_minutes)],
        )
    }

    async fn apply_step_sync(
        &self,
        step_id: &str,
        update: &StepSyncUpdate,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE test_run_steps
             SET status = ?1,
                 container_logs = COALESCE(?2, container_logs),
                 last_status_check = CURRENT_TIMESTAMP,
                 completed_at = CASE WHEN ?3 THEN COALESCE(completed_at, CURRENT_TIMESTAMP) ELSE completed_at END
             WHERE id = ?4",
            params![
                update.status.as_str(),
                update.container_logs,
                update.status.is_terminal(),
                step_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run step", step_id));
        }
        Ok(())
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE test_runs
             SET status = ?1,
                 completed_at = CASE WHEN ?2 THEN COALESCE(completed_at, CURRENT_TIMESTAMP) ELSE completed_at END
             WHERE id = ?3",
            params![status.as_str(), status.is_terminal(), run_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("run", run_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use super::*;

    async fn seeded() -> (tempfile::TempDir, SqliteStore, Team, Scenario) {
        let (dir, store) = temp_store().await;
        let team = seed_team(&store, "alpha").await;
        let scenario = seed_scenario(&store, "smoke").await;
        (dir, store, team, scenario)
    }

    fn new_run(team: &Team, scenario: &Scenario, created_by: Option<&str>) -> NewRun {
        NewRun {
            scenario_id: scenario.id.clone(),
            team_id: team.id.clone(),
            comment: None,
            created_by: created_by.map(str::to_string),
            parallelism: 1,
        }
    }

    #[tokio::test]
    async fn run_numbers_increase_from_one() {
        let (_dir, store, team, scenario) = seeded().await;
        let a = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        let b = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        assert_eq!(a.run_number, 1);
        assert_eq!(b.run_number, 2);
        assert_eq!(a.status, RunStatus::Pending);
        assert!(a.k6_test_names.is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_get_unique_numbers() {
        let (_dir, store, team, scenario) = seeded().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let new = new_run(&team, &scenario, None);
            handles.push(tokio::spawn(async move { store.create_run(&new).await }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().run_number);
        }
        numbers.sort();
        assert_eq!(numbers, (1..=16).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn finalize_records_handles_and_start_time() {
        let (_dir, store, team, scenario) = seeded().await;
        let run = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        let handles = vec!["a-1".to_string(), "b-1".to_string()];
        let run = store
            .finalize_run(&run.id, RunStatus::Running, &handles)
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.k6_test_names, handles);
        assert!(run.started_at.is_some());

        let failed = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        let failed = store
            .finalize_run(&failed.id, RunStatus::Failed, &[])
            .await
            .unwrap();
        assert!(failed.started_at.is_none());
    }

    #[tokio::test]
    async fn participant_listing_only_shows_created_runs() {
        let (_dir, store, team, scenario) = seeded().await;
        store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        store
            .create_run(&new_run(&team, &scenario, Some("user-1")))
            .await
            .unwrap();
        assert_eq!(store.list_team_runs(&team.id, false).await.unwrap().len(), 2);
        let mine = store.list_team_runs(&team.id, true).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].created_by.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn sync_candidates_cover_active_and_log_backfill() {
        let (_dir, store, team, scenario) = seeded().await;
        let run = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        let mut steps = Vec::new();
        for (i, name) in ["active", "finished", "logged", "never-submitted"].iter().enumerate() {
            steps.push(
                store
                    .create_run_step(&NewRunStep {
                        test_run_id: run.id.clone(),
                        scenario_step_id: format!("s{}", i),
                        step_name: name.to_string(),
                        step_order: i as i64 + 1,
                        step_type: "script".to_string(),
                    })
                    .await
                    .unwrap(),
            );
        }
        for step in &steps[..3] {
            store
                .mark_step_running(&step.id, &format!("h-{}", step.step_name))
                .await
                .unwrap();
        }
        store
            .apply_step_sync(
                &steps[1].id,
                &StepSyncUpdate {
                    status: StepStatus::Completed,
                    container_logs: None,
                },
            )
            .await
            .unwrap();
        store
            .apply_step_sync(
                &steps[2].id,
                &StepSyncUpdate {
                    status: StepStatus::Completed,
                    container_logs: Some("done".to_string()),
                },
            )
            .await
            .unwrap();
        store.mark_step_failed(&steps[3].id, "boom").await.unwrap();

        let names: Vec<String> = store
            .sync_candidates(120)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step_name)
            .collect();
        assert_eq!(names, ["active", "finished"]);

        let finished = store.get_run_step(&steps[1].id).await.unwrap().unwrap();
        assert!(finished.completed_at.is_some());
        assert!(finished.last_status_check.is_some());
    }

    #[tokio::test]
    async fn run_status_stamps_completion() {
        let (_dir, store, team, scenario) = seeded().await;
        let run = store.create_run(&new_run(&team, &scenario, None)).await.unwrap();
        store.set_run_status(&run.id, RunStatus::Running).await.unwrap();
        let running = store.get_run(&run.id).await.unwrap().unwrap();
        assert!(running.completed_at.is_none());

        store.set_run_status(&run.id, RunStatus::Completed).await.unwrap();
        let done = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(done.completed_at.is_some());
    }
}
