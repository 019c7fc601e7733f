use crate::error::RepositoryError;
use crate::model::{ActionRecord, JoinRecord, Snapshot, StatsCache, TableRecord};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Persistence contract for tables, snapshots, actions and joins.
///
/// Implementations must enforce:
/// - one snapshot per `(table_id, version)`
/// - one action per `(table_id, order)`
/// - immutability of an action's table, order, name and parameters
/// - atomicity of [`Repository::commit_flush`] and [`Repository::insert_join`]
pub trait Repository: fmt::Debug + Send + Sync {
    fn insert_table(&self, table: &TableRecord) -> RepoResult<()>;
    fn get_table(&self, id: Uuid) -> RepoResult<TableRecord>;

    /// Highest-version snapshot of the table, if any.
    fn latest_snapshot(&self, table_id: Uuid) -> RepoResult<Option<Snapshot>>;
    fn snapshot_by_version(&self, table_id: Uuid, version: u32) -> RepoResult<Option<Snapshot>>;
    fn insert_snapshot(&self, snapshot: &Snapshot) -> RepoResult<()>;

    fn insert_action(&self, action: &ActionRecord) -> RepoResult<()>;
    fn get_action(&self, id: Uuid) -> RepoResult<ActionRecord>;
    /// Only `snapshot_id` and `cached` may differ from the stored record.
    fn update_action(&self, action: &ActionRecord) -> RepoResult<()>;
    /// Store `cache` on the action without touching any other field.
    fn cache_action_stats(&self, id: Uuid, cache: &StatsCache) -> RepoResult<()>;
    /// Unapplied actions ascending by `order`, optionally capped at `max_order`.
    fn pending_actions(&self, table_id: Uuid, max_order: Option<u32>) -> RepoResult<Vec<ActionRecord>>;

    /// Insert `snapshot` and stamp `applied` actions with its id, all or nothing.
    fn commit_flush(&self, snapshot: &Snapshot, applied: &[Uuid]) -> RepoResult<()>;

    /// Insert the result table and its join record together.
    fn insert_join(&self, table: &TableRecord, join: &JoinRecord) -> RepoResult<()>;
    /// Join record whose result lives in `table_id`.
    fn get_join(&self, table_id: Uuid) -> RepoResult<Option<JoinRecord>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<Uuid, TableRecord>,
    snapshots: Vec<Snapshot>,
    actions: Vec<ActionRecord>,
    joins: Vec<JoinRecord>,
}

impl MemoryState {
    fn check_snapshot(&self, snapshot: &Snapshot) -> RepoResult<()> {
        let taken = self
            .snapshots
            .iter()
            .any(|s| s.table_id == snapshot.table_id && s.version == snapshot.version);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "table {} already has snapshot version {}",
                snapshot.table_id, snapshot.version
            )));
        }
        Ok(())
    }

    fn action_mut(&mut self, id: Uuid) -> RepoResult<&mut ActionRecord> {
        self.actions
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(RepositoryError::NotFound { entity: "action", id })
    }
}

/// Process-local repository, used by tests and embedders without a database.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("repository mutex poisoned")
    }
}

impl Repository for InMemoryRepository {
    fn insert_table(&self, table: &TableRecord) -> RepoResult<()> {
        let mut state = self.state();
        if state.tables.contains_key(&table.id) {
            return Err(RepositoryError::Conflict(format!("table {} exists", table.id)));
        }
        state.tables.insert(table.id, table.clone());
        Ok(())
    }

    fn get_table(&self, id: Uuid) -> RepoResult<TableRecord> {
        self.state()
            .tables
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound { entity: "table", id })
    }

    fn latest_snapshot(&self, table_id: Uuid) -> RepoResult<Option<Snapshot>> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .filter(|s| s.table_id == table_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    fn snapshot_by_version(&self, table_id: Uuid, version: u32) -> RepoResult<Option<Snapshot>> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .find(|s| s.table_id == table_id && s.version == version)
            .cloned())
    }

    fn insert_snapshot(&self, snapshot: &Snapshot) -> RepoResult<()> {
        let mut state = self.state();
        state.check_snapshot(snapshot)?;
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn insert_action(&self, action: &ActionRecord) -> RepoResult<()> {
        let mut state = self.state();
        let taken = state
            .actions
            .iter()
            .any(|a| a.table_id == action.table_id && a.order == action.order);
        if taken {
            return Err(RepositoryError::Conflict(format!(
                "table {} already has an action with order {}",
                action.table_id, action.order
            )));
        }
        state.actions.push(action.clone());
        Ok(())
    }

    fn get_action(&self, id: Uuid) -> RepoResult<ActionRecord> {
        self.state()
            .actions
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound { entity: "action", id })
    }

    fn update_action(&self, action: &ActionRecord) -> RepoResult<()> {
        let mut state = self.state();
        let stored = state.action_mut(action.id)?;
        if let Some(field) = action.changed_creation_field(stored) {
            return Err(RepositoryError::ImmutableFieldViolation { field });
        }
        *stored = action.clone();
        Ok(())
    }

    fn cache_action_stats(&self, id: Uuid, cache: &StatsCache) -> RepoResult<()> {
        self.state().action_mut(id)?.cached = Some(cache.clone());
        Ok(())
    }

    fn pending_actions(&self, table_id: Uuid, max_order: Option<u32>) -> RepoResult<Vec<ActionRecord>> {
        let mut pending: Vec<ActionRecord> = self
            .state()
            .actions
            .iter()
            .filter(|a| a.table_id == table_id && a.is_pending())
            .filter(|a| max_order.map_or(true, |max| a.order <= max))
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.order);
        Ok(pending)
    }

    fn commit_flush(&self, snapshot: &Snapshot, applied: &[Uuid]) -> RepoResult<()> {
        let mut state = self.state();
        state.check_snapshot(snapshot)?;
        for id in applied {
            state.action_mut(*id)?;
        }
        for id in applied {
            state.action_mut(*id)?.snapshot_id = Some(snapshot.id);
        }
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn insert_join(&self, table: &TableRecord, join: &JoinRecord) -> RepoResult<()> {
        let mut state = self.state();
        if state.tables.contains_key(&table.id) || state.joins.iter().any(|j| j.table_id == join.table_id) {
            return Err(RepositoryError::Conflict(format!("table {} exists", table.id)));
        }
        state.tables.insert(table.id, table.clone());
        state.joins.push(join.clone());
        Ok(())
    }

    fn get_join(&self, table_id: Uuid) -> RepoResult<Option<JoinRecord>> {
        Ok(self.state().joins.iter().find(|j| j.table_id == table_id).cloned())
    }
}
