//! Per-table state machine and projection.
//!
//! A table is either [`TableState::Empty`], holds a snapshot, or holds a
//! snapshot plus pending actions. Reading a projection is cheap: rows are
//! replayed through the composed pending actions and columns/stats come from
//! the newest pending action's stats cache when one exists. Materializing is
//! the expensive path: it recomputes stats for every affected column and is
//! the only result that gets persisted as a new snapshot.

use crate::action::{Action, Transform};
use crate::compose::ComposedAction;
use crate::error::ActionError;
use crate::model::{ActionRecord, Column, Row, Snapshot, StatsCache};
use crate::registry::ActionRegistry;
use crate::stats::{recalculate_stats, ColumnStats};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum TableState {
    Empty,
    HasSnapshot(Snapshot),
    HasSnapshotWithPending {
        snapshot: Snapshot,
        /// Ascending by `order`.
        pending: Vec<ActionRecord>,
    },
}

/// The visible state of a table, not necessarily persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Projection {
    /// Version of the snapshot the projection starts from.
    pub version: Option<u32>,
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    pub column_stats: Vec<ColumnStats>,
    pub pending_actions: usize,
}

/// Fully recomputed result of the pending chain, ready to become a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Materialized {
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    pub column_stats: Vec<ColumnStats>,
    /// Every pending action folded into this result.
    pub applied: Vec<Uuid>,
}

impl TableState {
    /// Already-applied records are dropped; the rest are sorted by `order`.
    pub fn new(snapshot: Option<Snapshot>, pending: Vec<ActionRecord>) -> Self {
        let mut pending: Vec<ActionRecord> = pending.into_iter().filter(ActionRecord::is_pending).collect();
        pending.sort_by_key(|a| a.order);
        match snapshot {
            None => {
                if !pending.is_empty() {
                    log::warn!("ignoring {} pending actions on a table without a snapshot", pending.len());
                }
                TableState::Empty
            }
            Some(snapshot) if pending.is_empty() => TableState::HasSnapshot(snapshot),
            Some(snapshot) => TableState::HasSnapshotWithPending { snapshot, pending },
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            TableState::Empty => None,
            TableState::HasSnapshot(snapshot) | TableState::HasSnapshotWithPending { snapshot, .. } => {
                Some(snapshot)
            }
        }
    }

    pub fn pending(&self) -> &[ActionRecord] {
        match self {
            TableState::HasSnapshotWithPending { pending, .. } => pending,
            _ => &[],
        }
    }

    /// Restrict the pending chain to actions with `order <= order`.
    pub fn until(self, order: u32) -> Self {
        match self {
            TableState::HasSnapshotWithPending { snapshot, pending } => TableState::new(
                Some(snapshot),
                pending.into_iter().filter(|a| a.order <= order).collect(),
            ),
            other => other,
        }
    }

    /// Compose the pending chain, validating each action against the columns
    /// produced by the actions before it. Stored names the registry no longer
    /// knows are skipped.
    pub fn compose(&self, registry: &ActionRegistry) -> Result<ComposedAction, ActionError> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(ComposedAction::new());
        };
        let mut columns = snapshot.columns.clone();
        let mut composed = ComposedAction::new();
        for record in self.pending() {
            let Some(kind) = registry.lookup(&record.name) else {
                log::warn!(
                    "skipping action {} with unregistered name '{}'",
                    record.id,
                    record.name
                );
                continue;
            };
            let action = Action::new(kind, record.parameters.clone(), Some(columns.as_slice()));
            if let Some(err) = action.error() {
                return Err(err.clone());
            }
            columns = action.apply_columns(&columns)?.columns;
            composed.push(action);
        }
        Ok(composed)
    }

    /// Columns new actions validate against. `None` without a snapshot.
    pub fn projected_columns(&self, registry: &ActionRegistry) -> Result<Option<Vec<Column>>, ActionError> {
        match self {
            TableState::Empty => Ok(None),
            TableState::HasSnapshot(snapshot) => Ok(Some(snapshot.columns.clone())),
            TableState::HasSnapshotWithPending { snapshot, pending } => {
                if let Some(cache) = pending.last().and_then(|a| a.cached.as_ref()) {
                    return Ok(Some(cache.columns.clone()));
                }
                let effect = self.compose(registry)?.apply_columns(&snapshot.columns)?;
                Ok(Some(effect.columns))
            }
        }
    }

    pub fn project(&self, registry: &ActionRegistry) -> Result<Projection, ActionError> {
        match self {
            TableState::Empty => Ok(Projection::default()),
            TableState::HasSnapshot(snapshot) => Ok(Projection {
                version: Some(snapshot.version),
                rows: snapshot.rows.clone(),
                columns: snapshot.columns.clone(),
                column_stats: snapshot.column_stats.clone(),
                pending_actions: 0,
            }),
            TableState::HasSnapshotWithPending { snapshot, pending } => {
                let newest = pending.last().map(|a| a.id);
                let (rows, columns, column_stats) =
                    match pending.last().and_then(|a| a.cached.clone()) {
                        Some(StatsCache {
                            columns,
                            column_stats,
                        }) => {
                            log::debug!("projection served from stats cache of action {newest:?}");
                            let composed = self.compose(registry)?;
                            (replay(&composed, &snapshot.rows)?, columns, column_stats)
                        }
                        None => {
                            log::debug!("no stats cache for action {newest:?}, recomputing");
                            let run = self.run(registry)?;
                            (run.rows, run.columns, run.column_stats)
                        }
                    };
                Ok(Projection {
                    version: Some(snapshot.version),
                    rows,
                    columns,
                    column_stats,
                    pending_actions: pending.len(),
                })
            }
        }
    }

    /// Columns and stats of the whole pending chain, for caching on its
    /// newest action.
    pub fn stats_cache(&self, registry: &ActionRegistry) -> Result<Option<StatsCache>, ActionError> {
        if !matches!(self, TableState::HasSnapshotWithPending { .. }) {
            return Ok(None);
        }
        let run = self.run(registry)?;
        Ok(Some(StatsCache {
            columns: run.columns,
            column_stats: run.column_stats,
        }))
    }

    /// `None` when there is nothing pending. An empty table cannot be
    /// materialized.
    pub fn materialize(&self, registry: &ActionRegistry) -> Result<Option<Materialized>, ActionError> {
        match self {
            TableState::Empty => Err(ActionError::MissingSnapshot),
            TableState::HasSnapshot(_) => Ok(None),
            TableState::HasSnapshotWithPending { .. } => self.run(registry).map(Some),
        }
    }

    fn run(&self, registry: &ActionRegistry) -> Result<Materialized, ActionError> {
        let Some(snapshot) = self.snapshot() else {
            return Err(ActionError::MissingSnapshot);
        };
        let composed = self.compose(registry)?;
        let rows = replay(&composed, &snapshot.rows)?;
        let effect = composed.apply_columns(&snapshot.columns)?;
        let column_stats = recalculate_stats(&snapshot.column_stats, &rows, &effect.columns, &effect.affected);
        Ok(Materialized {
            rows,
            columns: effect.columns,
            column_stats,
            applied: self.pending().iter().map(|a| a.id).collect(),
        })
    }
}

fn replay(composed: &ComposedAction, rows: &[Row]) -> Result<Vec<Row>, ActionError> {
    rows.iter().map(|row| composed.apply_row(row.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::calculate_column_stats;
    use crate::value::{ColumnType, Value};
    use pretty_assertions::assert_eq;

    fn snapshot() -> Snapshot {
        let columns = vec![
            Column::new("0", "Id", ColumnType::String),
            Column::new("1", "Name", ColumnType::String),
        ];
        let rows = vec![
            Row::new("0").with("0", "1").with("1", " Ana "),
            Row::new("1").with("0", "2").with("1", Value::Null),
        ];
        let column_stats = columns.iter().map(|c| calculate_column_stats(c, &rows)).collect();
        Snapshot {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            version: 1,
            rows,
            columns,
            column_stats,
        }
    }

    fn record(snapshot: &Snapshot, order: u32, name: &str, params: &[&str]) -> ActionRecord {
        ActionRecord::new(
            snapshot.table_id,
            order,
            name,
            params.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn empty_table_projects_nothing() {
        let state = TableState::new(None, Vec::new());
        let registry = ActionRegistry::standard();
        assert_eq!(state, TableState::Empty);
        assert_eq!(state.project(&registry).unwrap(), Projection::default());
        assert_eq!(state.projected_columns(&registry).unwrap(), None);
        assert_eq!(state.materialize(&registry), Err(ActionError::MissingSnapshot));
    }

    #[test]
    fn snapshot_without_pending_is_returned_verbatim() {
        let snap = snapshot();
        let state = TableState::new(Some(snap.clone()), Vec::new());
        let projection = state.project(&ActionRegistry::standard()).unwrap();
        assert_eq!(projection.rows, snap.rows);
        assert_eq!(projection.columns, snap.columns);
        assert_eq!(projection.column_stats, snap.column_stats);
        assert_eq!(projection.version, Some(1));
        assert_eq!(state.materialize(&ActionRegistry::standard()), Ok(None));
    }

    #[test]
    fn pending_actions_are_replayed_in_order() {
        let snap = snapshot();
        let pending = vec![
            record(&snap, 2, "fill_null", &["1", "nobody"]),
            record(&snap, 1, "cast_column", &["0", "integer"]),
        ];
        let state = TableState::new(Some(snap.clone()), pending);
        let orders: Vec<u32> = state.pending().iter().map(|a| a.order).collect();
        assert_eq!(orders, vec![1, 2]);

        let projection = state.project(&ActionRegistry::standard()).unwrap();
        assert_eq!(projection.pending_actions, 2);
        assert_eq!(projection.rows[0].get("0"), &Value::Integer(1));
        assert_eq!(projection.rows[1].get("1"), &Value::from("nobody"));
        assert_eq!(projection.columns[0].column_type, ColumnType::Integer);
        assert_eq!(projection.column_stats[0].column_type, ColumnType::Integer);
    }

    #[test]
    fn until_limits_the_chain() {
        let snap = snapshot();
        let pending = vec![
            record(&snap, 1, "cast_column", &["0", "integer"]),
            record(&snap, 2, "cast_column", &["0", "float"]),
        ];
        let state = TableState::new(Some(snap), pending).until(1);
        let projection = state.project(&ActionRegistry::standard()).unwrap();
        assert_eq!(projection.columns[0].column_type, ColumnType::Integer);
        assert_eq!(projection.pending_actions, 1);
    }

    #[test]
    fn cached_columns_and_stats_are_preferred() {
        let snap = snapshot();
        let mut action = record(&snap, 1, "rename_column", &["1", "Who"]);
        let cache = StatsCache {
            columns: vec![Column::new("marker", "Cached", ColumnType::String)],
            column_stats: Vec::new(),
        };
        action.cached = Some(cache.clone());
        let state = TableState::new(Some(snap), vec![action]);
        let projection = state.project(&ActionRegistry::standard()).unwrap();
        assert_eq!(projection.columns, cache.columns);
        assert_eq!(
            state.projected_columns(&ActionRegistry::standard()).unwrap(),
            Some(cache.columns)
        );
    }

    #[test]
    fn materialize_recomputes_only_affected_stats() {
        let snap = snapshot();
        let state = TableState::new(Some(snap.clone()), vec![record(&snap, 1, "cast_column", &["0", "integer"])]);
        let out = state.materialize(&ActionRegistry::standard()).unwrap().unwrap();
        assert_eq!(out.column_stats[1], snap.column_stats[1]);
        assert_ne!(out.column_stats[0], snap.column_stats[0]);
        assert_eq!(out.applied, state.pending().iter().map(|a| a.id).collect::<Vec<_>>());
    }

    #[test]
    fn unregistered_names_are_skipped_but_still_applied() {
        let snap = snapshot();
        let state = TableState::new(
            Some(snap.clone()),
            vec![record(&snap, 1, "random action", &["0"])],
        );
        let out = state.materialize(&ActionRegistry::standard()).unwrap().unwrap();
        assert_eq!(out.rows, snap.rows);
        assert_eq!(out.applied.len(), 1);
    }

    #[test]
    fn invalid_stored_chain_fails_without_result() {
        let snap = snapshot();
        let state = TableState::new(
            Some(snap.clone()),
            vec![
                record(&snap, 1, "cast_column", &["0", "integer"]),
                record(&snap, 2, "cast_column", &["missing", "integer"]),
            ],
        );
        assert_eq!(
            state.materialize(&ActionRegistry::standard()),
            Err(ActionError::UnknownColumn {
                column: "missing".to_string()
            })
        );
    }
}
