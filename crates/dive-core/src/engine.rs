use crate::action::{Action, Transform};
use crate::config::{EngineConfig, TableProperties};
use crate::error::{EngineError, RepositoryError, Result};
use crate::extract::{Extracted, Extractor};
use crate::join::{check_clause_columns, perform_join, supported_clause, JoinClause, JoinInput, JoinOutput, JoinType};
use crate::model::{ActionRecord, Column, JoinRecord, Snapshot, StatsCache, TableRecord};
use crate::registry::ActionRegistry;
use crate::repository::Repository;
use crate::stats::calculate_column_stats;
use crate::table::{Projection, TableState};
use crate::tasks::{Task, TaskQueue};
use std::io::Read;
use uuid::Uuid;

/// Request to join the current states of two tables into a new table.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub name: String,
    pub source_table_id: Uuid,
    pub target_table_id: Uuid,
    pub join_type: JoinType,
    pub clauses: Vec<JoinClause>,
    /// Defaults to the target table id.
    pub suffix: Option<String>,
}

/// Orchestrates tables, actions and joins over a [`Repository`].
///
/// Writes that trigger deferred work are committed before the matching
/// [`Task`] is handed to the queue.
#[derive(Debug)]
pub struct Engine<R, Q> {
    repo: R,
    queue: Q,
    registry: ActionRegistry,
    config: EngineConfig,
}

impl<R: Repository, Q: TaskQueue> Engine<R, Q> {
    pub fn new(repo: R, queue: Q) -> Self {
        Self::with_config(repo, queue, ActionRegistry::standard(), EngineConfig::default())
    }

    pub fn with_config(repo: R, queue: Q, registry: ActionRegistry, config: EngineConfig) -> Self {
        Self {
            repo,
            queue,
            registry,
            config,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_table(&self, name: &str, properties: Option<TableProperties>) -> Result<TableRecord> {
        let table = TableRecord::new(name, properties.unwrap_or_else(|| self.config.default_properties.clone()));
        self.repo.insert_table(&table)?;
        Ok(table)
    }

    /// Store the first snapshot of a table. Stats are computed when the
    /// extraction did not supply them.
    pub fn seed_table(&self, table_id: Uuid, extracted: Extracted) -> Result<Snapshot> {
        self.repo.get_table(table_id)?;
        let Extracted {
            rows,
            columns,
            column_stats,
        } = extracted;
        let column_stats = column_stats
            .unwrap_or_else(|| columns.iter().map(|c| calculate_column_stats(c, &rows)).collect());
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            table_id,
            version: 1,
            rows,
            columns,
            column_stats,
        };
        self.repo.insert_snapshot(&snapshot)?;
        log::info!(
            "seeded table {table_id} with {} rows and {} columns",
            snapshot.rows.len(),
            snapshot.columns.len()
        );
        Ok(snapshot)
    }

    pub fn extract_table(
        &self,
        table_id: Uuid,
        source: &mut dyn Read,
        extractor: &dyn Extractor,
    ) -> Result<Snapshot> {
        let table = self.repo.get_table(table_id)?;
        let extracted = extractor.extract(source, &table.properties)?;
        self.seed_table(table_id, extracted)
    }

    pub fn state(&self, table_id: Uuid) -> Result<TableState> {
        self.repo.get_table(table_id)?;
        let snapshot = self.repo.latest_snapshot(table_id)?;
        let pending = self.repo.pending_actions(table_id, None)?;
        Ok(TableState::new(snapshot, pending))
    }

    pub fn project(&self, table_id: Uuid) -> Result<Projection> {
        Ok(self.state(table_id)?.project(&self.registry)?)
    }

    /// Projection of the chain ending at `action_id`. For an applied action
    /// this is the current snapshot plus nothing newer than the action.
    pub fn project_until(&self, action_id: Uuid) -> Result<Projection> {
        let action = self.repo.get_action(action_id)?;
        let state = self.state(action.table_id)?.until(action.order);
        Ok(state.project(&self.registry)?)
    }

    /// The first `preview_rows` rows of the projection. A joined table whose
    /// result is not materialized yet previews the join without storing it.
    pub fn preview(&self, table_id: Uuid) -> Result<Projection> {
        let state = self.state(table_id)?;
        let mut projection = match (&state, self.repo.get_join(table_id)?) {
            (TableState::Empty, Some(join)) => {
                let out = self.run_join(&join)?;
                Projection {
                    version: None,
                    rows: out.rows,
                    columns: out.columns,
                    column_stats: out.column_stats,
                    pending_actions: 0,
                }
            }
            _ => state.project(&self.registry)?,
        };
        projection.rows.truncate(self.config.preview_rows);
        Ok(projection)
    }

    /// Validate and store a pending action, then queue its stats pass.
    ///
    /// Invalid actions are rejected before anything is written. `order` must
    /// be greater than that of every pending action on the table.
    pub fn create_action(
        &self,
        table_id: Uuid,
        order: u32,
        name: &str,
        parameters: Vec<String>,
    ) -> Result<ActionRecord> {
        let kind = self
            .registry
            .lookup(name)
            .ok_or_else(|| EngineError::UnknownAction(name.to_string()))?;
        let state = self.state(table_id)?;
        if let Some(last) = state.pending().last().map(|a| a.order) {
            if order <= last {
                return Err(EngineError::OutOfOrder {
                    table: table_id,
                    order,
                    last,
                });
            }
        }
        let columns = state.projected_columns(&self.registry)?;
        let action = Action::new(kind, parameters.clone(), columns.as_deref());
        if let Some(err) = action.error() {
            return Err(err.clone().into());
        }

        let record = ActionRecord::new(table_id, order, name, parameters);
        self.repo.insert_action(&record)?;
        log::debug!("stored action {} ({name}) at order {order} on table {table_id}", record.id);
        self.queue.enqueue(Task::RecomputeStats { action_id: record.id });
        Ok(record)
    }

    /// Cache columns/stats of the chain ending at `action_id` on that action.
    /// A no-op for actions already folded into a snapshot.
    pub fn recompute_stats(&self, action_id: Uuid) -> Result<Option<StatsCache>> {
        let action = self.repo.get_action(action_id)?;
        if !action.is_pending() {
            log::warn!("action {action_id} is already applied, skipping stats pass");
            return Ok(None);
        }
        let state = self.state(action.table_id)?.until(action.order);
        let cache = state.stats_cache(&self.registry)?;
        if let Some(cache) = &cache {
            self.repo.cache_action_stats(action_id, cache)?;
            log::debug!("cached stats for action {action_id}");
        }
        Ok(cache)
    }

    /// Flush pending actions into a new snapshot.
    ///
    /// Returns `None` without pending actions. The snapshot and the applied
    /// markers are written together or not at all.
    pub fn apply_table(&self, table_id: Uuid) -> Result<Option<Snapshot>> {
        let state = self.state(table_id)?;
        let Some(previous) = state.snapshot().map(|s| s.version) else {
            return Err(EngineError::MissingSnapshot(table_id));
        };
        let Some(materialized) = state.materialize(&self.registry)? else {
            log::debug!("table {table_id} has no pending actions, nothing to flush");
            return Ok(None);
        };
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            table_id,
            version: previous + 1,
            rows: materialized.rows,
            columns: materialized.columns,
            column_stats: materialized.column_stats,
        };
        self.repo.commit_flush(&snapshot, &materialized.applied)?;
        log::info!(
            "flushed {} actions into table {table_id} version {}",
            materialized.applied.len(),
            snapshot.version
        );
        Ok(Some(snapshot))
    }

    /// Create the table holding a join result, then queue its
    /// materialization. Unsupported joins and unknown clause columns are
    /// rejected before anything is written.
    pub fn create_join(&self, spec: JoinSpec) -> Result<TableRecord> {
        let clause = supported_clause(spec.join_type, &spec.clauses)?;
        let source = self.columns_of(spec.source_table_id)?;
        let target = self.columns_of(spec.target_table_id)?;
        check_clause_columns(clause, &source, &target)?;

        let join_id = Uuid::new_v4();
        let mut table = TableRecord::new(spec.name, self.config.default_properties.clone());
        table.joined_from = Some(join_id);
        let join = JoinRecord {
            id: join_id,
            table_id: table.id,
            source_table_id: spec.source_table_id,
            target_table_id: spec.target_table_id,
            join_type: spec.join_type,
            clauses: spec.clauses,
            suffix: spec.suffix.unwrap_or_else(|| spec.target_table_id.to_string()),
        };
        self.repo.insert_join(&table, &join)?;
        log::debug!("stored join {join_id} into table {}", table.id);
        self.queue.enqueue(Task::MaterializeJoin { table_id: table.id });
        Ok(table)
    }

    /// Write the first snapshot of a joined table. Returns the existing
    /// snapshot when the join was already materialized.
    pub fn materialize_join(&self, table_id: Uuid) -> Result<Snapshot> {
        let join = self.repo.get_join(table_id)?.ok_or(EngineError::NotJoined(table_id))?;
        if let Some(existing) = self.repo.latest_snapshot(table_id)? {
            log::debug!("join table {table_id} already materialized");
            return Ok(existing);
        }
        let out = self.run_join(&join)?;
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            table_id,
            version: 1,
            rows: out.rows,
            columns: out.columns,
            column_stats: out.column_stats,
        };
        match self.repo.insert_snapshot(&snapshot) {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                if let Some(existing) = self.repo.latest_snapshot(table_id)? {
                    return Ok(existing);
                }
            }
            Err(err) => return Err(err.into()),
        }
        log::info!("materialized join table {table_id} with {} rows", snapshot.rows.len());
        Ok(snapshot)
    }

    pub fn run_task(&self, task: Task) -> Result<()> {
        match task {
            Task::RecomputeStats { action_id } => self.recompute_stats(action_id).map(drop),
            Task::MaterializeJoin { table_id } => self.materialize_join(table_id).map(drop),
            Task::ApplyTable { table_id } => self.apply_table(table_id).map(drop),
        }
    }

    fn columns_of(&self, table_id: Uuid) -> Result<Vec<Column>> {
        self.state(table_id)?
            .projected_columns(&self.registry)?
            .ok_or(EngineError::MissingSnapshot(table_id))
    }

    fn run_join(&self, join: &JoinRecord) -> Result<JoinOutput> {
        let source = self.project(join.source_table_id)?;
        if source.version.is_none() {
            return Err(EngineError::MissingSnapshot(join.source_table_id));
        }
        let target = self.project(join.target_table_id)?;
        if target.version.is_none() {
            return Err(EngineError::MissingSnapshot(join.target_table_id));
        }
        let out = perform_join(
            join.join_type,
            &join.clauses,
            JoinInput {
                columns: &source.columns,
                rows: &source.rows,
                column_stats: &source.column_stats,
            },
            JoinInput {
                columns: &target.columns,
                rows: &target.rows,
                column_stats: &target.column_stats,
            },
            &join.suffix,
        )?;
        Ok(out)
    }
}
