use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::info;

use super::types::{NewScenario, NewStep, NewTeam, Scenario, ScenarioStep, StepPatch, Team};
use super::{SqliteStore, StoreError, is_unique_violation, json_column};
use crate::core::orchestrator::StepKind;
use crate::core::orchestrator::naming::{is_cluster_safe_slug, sanitize_segment};

const TEAM_COLUMNS: &str = "id, slug, name, environment_json, created_at";
const SCENARIO_COLUMNS: &str = "id, identifier, name, description, is_active, created_at";
const STEP_COLUMNS: &str =
    "id, scenario_id, name, description, step_order, step_type, config_json, is_active";

/// Floor of the temporary range used while renumbering steps.
const REORDER_TEMP_BASE: i64 = 1000;

fn team_from_row(row: &Row) -> rusqlite::Result<Team> {
    let env_json: String = row.get(3)?;
    Ok(Team {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        environment: json_column(3, &env_json)?,
        created_at: row.get(4)?,
    })
}

fn scenario_from_row(row: &Row) -> rusqlite::Result<Scenario> {
    Ok(Scenario {
        id: row.get(0)?,
        identifier: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn step_from_row(row: &Row) -> rusqlite::Result<ScenarioStep> {
    let step_type: String = row.get(5)?;
    let config_json: String = row.get(6)?;
    let config: serde_json::Value = json_column(6, &config_json)?;
    let kind = StepKind::from_parts(&step_type, config).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ScenarioStep {
        id: row.get(0)?,
        scenario_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        step_order: row.get(4)?,
        kind,
        is_active: row.get(7)?,
    })
}

fn load_steps(db: &Connection, scenario_id: &str, active_only: bool) -> Result<Vec<ScenarioStep>, StoreError> {
    let sql = format!(
        "SELECT {} FROM scenario_steps WHERE scenario_id = ?1 {} ORDER BY step_order ASC",
        STEP_COLUMNS,
        if active_only { "AND is_active = 1" } else { "" }
    );
    let mut stmt = db.prepare(&sql)?;
    let rows = stmt.query_map(params![scenario_id], step_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn load_step(db: &Connection, scenario_id: &str, step_id: &str) -> Result<ScenarioStep, StoreError> {
    let sql = format!(
        "SELECT {} FROM scenario_steps WHERE id = ?1 AND scenario_id = ?2",
        STEP_COLUMNS
    );
    db.query_row(&sql, params![step_id, scenario_id], step_from_row)
        .optional()?
        .ok_or_else(|| StoreError::not_found("step", step_id))
}

fn ensure_scenario(db: &Connection, scenario_id: &str) -> Result<(), StoreError> {
    let exists: bool = db.query_row(
        "SELECT EXISTS(SELECT 1 FROM scenarios WHERE id = ?1)",
        params![scenario_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::not_found("scenario", scenario_id))
    }
}

fn order_taken(
    db: &Connection,
    scenario_id: &str,
    step_order: i64,
    except_step: Option<&str>,
) -> Result<bool, StoreError> {
    let taken: bool = db.query_row(
        "SELECT EXISTS(SELECT 1 FROM scenario_steps WHERE scenario_id = ?1 AND step_order = ?2 AND id != COALESCE(?3, ''))",
        params![scenario_id, step_order, except_step],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// Step names become a segment of the execution handle, so each must yield
/// a non-empty segment that no other step of the scenario already yields.
fn check_step_name(
    db: &Connection,
    scenario_id: &str,
    name: &str,
    except_step: Option<&str>,
) -> Result<(), StoreError> {
    let segment = sanitize_segment(name);
    if segment.is_empty() {
        return Err(StoreError::Invalid(format!(
            "step name '{}' needs at least one letter or digit",
            name
        )));
    }
    let mut stmt = db.prepare(
        "SELECT name FROM scenario_steps WHERE scenario_id = ?1 AND id != COALESCE(?2, '')",
    )?;
    let others = stmt.query_map(params![scenario_id, except_step], |row| row.get::<_, String>(0))?;
    for other in others {
        let other = other?;
        if sanitize_segment(&other) == segment {
            return Err(StoreError::Conflict(format!(
                "step name '{}' clashes with existing step '{}'",
                name, other
            )));
        }
    }
    Ok(())
}

impl SqliteStore {
    pub async fn create_team(&self, new: &NewTeam) -> Result<Team, StoreError> {
        if !is_cluster_safe_slug(&new.slug) {
            return Err(StoreError::Invalid(format!(
                "team slug '{}' must be lowercase alphanumerics and hyphens",
                new.slug
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let env_json = serde_json::to_string(&new.environment)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO teams (id, slug, name, environment_json) VALUES (?1, ?2, ?3, ?4)",
            params![id, new.slug, new.name, env_json],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("team slug '{}' already exists", new.slug))
            } else {
                e.into()
            }
        })?;
        let sql = format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLUMNS);
        Ok(db.query_row(&sql, params![id], team_from_row)?)
    }

    pub async fn find_team(&self, team_id: &str) -> Result<Option<Team>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLUMNS);
        Ok(db.query_row(&sql, params![team_id], team_from_row).optional()?)
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM teams ORDER BY slug ASC", TEAM_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], team_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn set_team_environment(
        &self,
        team_id: &str,
        environment: &BTreeMap<String, String>,
    ) -> Result<Team, StoreError> {
        let env_json = serde_json::to_string(environment)?;
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE teams SET environment_json = ?1 WHERE id = ?2",
            params![env_json, team_id],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("team", team_id));
        }
        let sql = format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLUMNS);
        Ok(db.query_row(&sql, params![team_id], team_from_row)?)
    }

    pub async fn create_scenario(&self, new: &NewScenario) -> Result<Scenario, StoreError> {
        if !is_cluster_safe_slug(&new.identifier) {
            return Err(StoreError::Invalid(format!(
                "scenario identifier '{}' must be lowercase alphanumerics and hyphens",
                new.identifier
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO scenarios (id, identifier, name, description) VALUES (?1, ?2, ?3, ?4)",
            params![id, new.identifier, new.name, new.description],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "scenario identifier '{}' already exists",
                    new.identifier
                ))
            } else {
                e.into()
            }
        })?;
        let sql = format!("SELECT {} FROM scenarios WHERE id = ?1", SCENARIO_COLUMNS);
        Ok(db.query_row(&sql, params![id], scenario_from_row)?)
    }

    pub async fn find_scenario(&self, scenario_id: &str) -> Result<Option<Scenario>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!("SELECT {} FROM scenarios WHERE id = ?1", SCENARIO_COLUMNS);
        Ok(db
            .query_row(&sql, params![scenario_id], scenario_from_row)
            .optional()?)
    }

    pub async fn list_scenarios(&self) -> Result<Vec<Scenario>, StoreError> {
        let db = self.db.lock().await;
        let sql = format!(
            "SELECT {} FROM scenarios ORDER BY created_at ASC, identifier ASC",
            SCENARIO_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], scenario_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn list_steps(&self, scenario_id: &str) -> Result<Vec<ScenarioStep>, StoreError> {
        let db = self.db.lock().await;
        ensure_scenario(&db, scenario_id)?;
        load_steps(&db, scenario_id, false)
    }

    pub(crate) async fn list_active_steps(
        &self,
        scenario_id: &str,
    ) -> Result<Vec<ScenarioStep>, StoreError> {
        let db = self.db.lock().await;
        load_steps(&db, scenario_id, true)
    }

    pub async fn add_step(&self, scenario_id: &str, new: &NewStep) -> Result<ScenarioStep, StoreError> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Invalid("step name is required".to_string()));
        }
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_scenario(&tx, scenario_id)?;
        check_step_name(&tx, scenario_id, &new.name, None)?;

        let step_order = match new.step_order {
            Some(order) if order < 1 => {
                return Err(StoreError::Invalid("step_order must be at least 1".to_string()));
            }
            Some(order) => {
                if order_taken(&tx, scenario_id, order, None)? {
                    return Err(StoreError::Conflict(format!(
                        "step order {} is already used in this scenario",
                        order
                    )));
                }
                order
            }
            None => tx.query_row(
                "SELECT COALESCE(MAX(step_order), 0) + 1 FROM scenario_steps WHERE scenario_id = ?1",
                params![scenario_id],
                |row| row.get(0),
            )?,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let config_json = serde_json::to_string(&new.kind.config_value())?;
        tx.execute(
            "INSERT INTO scenario_steps (id, scenario_id, name, description, step_order, step_type, config_json, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                scenario_id,
                new.name,
                new.description,
                step_order,
                new.kind.type_name(),
                config_json,
                new.is_active
            ],
        )?;
        let step = load_step(&tx, scenario_id, &id)?;
        tx.commit()?;
        Ok(step)
    }

    pub async fn update_step(
        &self,
        scenario_id: &str,
        step_id: &str,
        patch: &StepPatch,
    ) -> Result<ScenarioStep, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = load_step(&tx, scenario_id, step_id)?;

        if let Some(order) = patch.step_order {
            if order < 1 {
                return Err(StoreError::Invalid("step_order must be at least 1".to_string()));
            }
            if order != current.step_order && order_taken(&tx, scenario_id, order, Some(step_id))? {
                return Err(StoreError::Conflict(format!(
                    "step order {} is already used in this scenario",
                    order
                )));
            }
        }
        if let Some(name) = &patch.name
            && name.trim().is_empty()
        {
            return Err(StoreError::Invalid("step name is required".to_string()));
        }
        if let Some(name) = &patch.name {
            check_step_name(&tx, scenario_id, name, Some(step_id))?;
        }

        let kind = patch
            .kind(&current.kind)
            .map_err(|e| StoreError::Invalid(format!("invalid step config: {}", e)))?
            .unwrap_or(current.kind);
        let config_json = serde_json::to_string(&kind.config_value())?;

        tx.execute(
            "UPDATE scenario_steps
             SET name = ?1, description = ?2, step_order = ?3, step_type = ?4, config_json = ?5,
                 is_active = ?6, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?7",
            params![
                patch.name.as_ref().unwrap_or(&current.name),
                patch.description.as_ref().or(current.description.as_ref()),
                patch.step_order.unwrap_or(current.step_order),
                kind.type_name(),
                config_json,
                patch.is_active.unwrap_or(current.is_active),
                step_id
            ],
        )?;
        let step = load_step(&tx, scenario_id, step_id)?;
        tx.commit()?;
        Ok(step)
    }

    /// Moves a step to `new_order` and renumbers the scenario to `1..N`.
    /// Positions past the end land the step last.
    pub async fn reorder_step(
        &self,
        scenario_id: &str,
        step_id: &str,
        new_order: i64,
    ) -> Result<Vec<ScenarioStep>, StoreError> {
        if new_order < 1 {
            return Err(StoreError::Invalid("new_order must be at least 1".to_string()));
        }
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_scenario(&tx, scenario_id)?;

        let mut ids: Vec<(String, i64)> = load_steps(&tx, scenario_id, false)?
            .into_iter()
            .map(|s| (s.id, s.step_order))
            .collect();
        let from = ids
            .iter()
            .position(|(id, _)| id == step_id)
            .ok_or_else(|| StoreError::not_found("step", step_id))?;
        let max_order = ids.iter().map(|(_, order)| *order).max().unwrap_or(0);

        let moved = ids.remove(from);
        let target = (new_order as usize).min(ids.len() + 1) - 1;
        ids.insert(target, moved);

        // Park every row outside both the current and the final range first,
        // so the unique (scenario_id, step_order) index never trips.
        let temp_base = REORDER_TEMP_BASE.max(max_order + 1);
        for (i, (id, _)) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE scenario_steps SET step_order = ?1 WHERE id = ?2",
                params![temp_base + i as i64, id],
            )?;
        }
        for (i, (id, _)) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE scenario_steps SET step_order = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                params![i as i64 + 1, id],
            )?;
        }

        let steps = load_steps(&tx, scenario_id, false)?;
        tx.commit()?;
        info!(
            "Reordered scenario {}: step {} now at {}",
            scenario_id,
            step_id,
            target + 1
        );
        Ok(steps)
    }
}
