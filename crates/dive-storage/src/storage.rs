use crate::schema;
use dive_core::{
    ActionRecord, JoinRecord, RepoResult, Repository, RepositoryError, Snapshot, StatsCache, TableRecord,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row as SqlRow};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("field '{field}' cannot change after creation")]
    Immutable { field: &'static str },
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for RepositoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => RepositoryError::NotFound { entity, id },
            StorageError::Immutable { field } => RepositoryError::ImmutableFieldViolation { field },
            StorageError::Sqlite(err) if is_unique_violation(&err) => RepositoryError::Conflict(err.to_string()),
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error(),
        Some(e) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// How long a writer waits on a locked database (default: 5s).
    pub busy_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed [`Repository`]. Cloning shares the connection.
#[derive(Debug, Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with_config(path, StorageConfig::default())
    }

    pub fn open_path_with_config(path: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        Self::init(Connection::open(path)?, config)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, StorageConfig::default())
    }

    pub fn open_uri(uri: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        Self::init(Connection::open_with_flags(uri, flags)?, StorageConfig::default())
    }

    fn init(conn: Connection, config: StorageConfig) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn insert_table(&self, table: &TableRecord) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        insert_table_tx(&conn, table)
    }

    pub fn get_table(&self, id: Uuid) -> Result<TableRecord> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                "SELECT id, name, properties, joined_from FROM tables WHERE id = ?1",
                params![id.to_string()],
                |r| {
                    let joined_from: Option<String> = r.get(3)?;
                    Ok((
                        parse_id(&r.get::<_, String>(0)?)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        joined_from.as_deref().map(parse_id).transpose()?,
                    ))
                },
            )
            .optional()?;
        let (id, name, properties, joined_from) = row.ok_or(StorageError::NotFound { entity: "table", id })?;
        Ok(TableRecord {
            id,
            name,
            properties: serde_json::from_str(&properties)?,
            joined_from,
        })
    }

    pub fn latest_snapshot(&self, table_id: Uuid) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let raw = conn
            .query_row(
                &format!("{SNAPSHOT_SELECT} WHERE table_id = ?1 ORDER BY version DESC LIMIT 1"),
                params![table_id.to_string()],
                RawSnapshot::from_row,
            )
            .optional()?;
        raw.map(RawSnapshot::decode).transpose()
    }

    pub fn snapshot_by_version(&self, table_id: Uuid, version: u32) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let raw = conn
            .query_row(
                &format!("{SNAPSHOT_SELECT} WHERE table_id = ?1 AND version = ?2"),
                params![table_id.to_string(), version],
                RawSnapshot::from_row,
            )
            .optional()?;
        raw.map(RawSnapshot::decode).transpose()
    }

    /// Number of stored snapshots of a table.
    pub fn snapshot_count(&self, table_id: Uuid) -> Result<u64> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let count = conn.query_row(
            "SELECT COUNT(*) FROM snapshots WHERE table_id = ?1",
            params![table_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        insert_snapshot_tx(&conn, snapshot)
    }

    pub fn insert_action(&self, action: &ActionRecord) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO actions (id, table_id, "order", name, parameters, snapshot_id, cached)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                action.id.to_string(),
                action.table_id.to_string(),
                action.order,
                &action.name,
                serde_json::to_string(&action.parameters)?,
                action.snapshot_id.map(|id| id.to_string()),
                action.cached.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    pub fn get_action(&self, id: Uuid) -> Result<ActionRecord> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        get_action_tx(&conn, id)
    }

    /// Persist `snapshot_id` and `cached`. Every other field must match the
    /// stored record.
    pub fn update_action(&self, action: &ActionRecord) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        let stored = get_action_tx(&tx, action.id)?;
        if let Some(field) = action.changed_creation_field(&stored) {
            return Err(StorageError::Immutable { field });
        }
        tx.execute(
            "UPDATE actions SET snapshot_id = ?2, cached = ?3 WHERE id = ?1",
            params![
                action.id.to_string(),
                action.snapshot_id.map(|id| id.to_string()),
                action.cached.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn cache_action_stats(&self, id: Uuid, cache: &StatsCache) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let changed = conn.execute(
            "UPDATE actions SET cached = ?2 WHERE id = ?1",
            params![id.to_string(), serde_json::to_string(cache)?],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound { entity: "action", id });
        }
        Ok(())
    }

    pub fn pending_actions(&self, table_id: Uuid, max_order: Option<u32>) -> Result<Vec<ActionRecord>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            r#"{ACTION_SELECT}
            WHERE table_id = ?1 AND snapshot_id IS NULL AND (?2 IS NULL OR "order" <= ?2)
            ORDER BY "order" ASC"#
        ))?;
        let rows = stmt.query_map(params![table_id.to_string(), max_order], RawAction::from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(raw?.decode()?);
        }
        Ok(out)
    }

    /// Insert the flushed snapshot and mark `applied` actions in one
    /// transaction.
    pub fn commit_flush(&self, snapshot: &Snapshot, applied: &[Uuid]) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        insert_snapshot_tx(&tx, snapshot)?;
        for id in applied {
            let changed = tx.execute(
                "UPDATE actions SET snapshot_id = ?2 WHERE id = ?1 AND snapshot_id IS NULL",
                params![id.to_string(), snapshot.id.to_string()],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound { entity: "action", id: *id });
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_join(&self, table: &TableRecord, join: &JoinRecord) -> Result<()> {
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        insert_table_tx(&tx, table)?;
        tx.execute(
            r#"
            INSERT INTO joins (id, table_id, source_table_id, target_table_id, join_type, clauses, suffix)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                join.id.to_string(),
                join.table_id.to_string(),
                join.source_table_id.to_string(),
                join.target_table_id.to_string(),
                serde_json::to_string(&join.join_type)?,
                serde_json::to_string(&join.clauses)?,
                &join.suffix,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_join(&self, table_id: Uuid) -> Result<Option<JoinRecord>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                r#"
                SELECT id, table_id, source_table_id, target_table_id, join_type, clauses, suffix
                FROM joins
                WHERE table_id = ?1
                "#,
                params![table_id.to_string()],
                |r| {
                    Ok((
                        parse_id(&r.get::<_, String>(0)?)?,
                        parse_id(&r.get::<_, String>(1)?)?,
                        parse_id(&r.get::<_, String>(2)?)?,
                        parse_id(&r.get::<_, String>(3)?)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, table_id, source_table_id, target_table_id, join_type, clauses, suffix)) = row else {
            return Ok(None);
        };
        Ok(Some(JoinRecord {
            id,
            table_id,
            source_table_id,
            target_table_id,
            join_type: serde_json::from_str(&join_type)?,
            clauses: serde_json::from_str(&clauses)?,
            suffix,
        }))
    }
}

const SNAPSHOT_SELECT: &str =
    "SELECT id, table_id, version, data_rows, data_columns, column_stats FROM snapshots";

const ACTION_SELECT: &str =
    r#"SELECT id, table_id, "order", name, parameters, snapshot_id, cached FROM actions"#;

fn parse_id(raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| rusqlite::Error::InvalidQuery)
}

/// Snapshot columns as read, before JSON decoding.
struct RawSnapshot {
    id: Uuid,
    table_id: Uuid,
    version: u32,
    rows: String,
    columns: String,
    column_stats: String,
}

impl RawSnapshot {
    fn from_row(r: &SqlRow<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(&r.get::<_, String>(0)?)?,
            table_id: parse_id(&r.get::<_, String>(1)?)?,
            version: r.get(2)?,
            rows: r.get(3)?,
            columns: r.get(4)?,
            column_stats: r.get(5)?,
        })
    }

    fn decode(self) -> Result<Snapshot> {
        Ok(Snapshot {
            id: self.id,
            table_id: self.table_id,
            version: self.version,
            rows: serde_json::from_str(&self.rows)?,
            columns: serde_json::from_str(&self.columns)?,
            column_stats: serde_json::from_str(&self.column_stats)?,
        })
    }
}

struct RawAction {
    id: Uuid,
    table_id: Uuid,
    order: u32,
    name: String,
    parameters: String,
    snapshot_id: Option<Uuid>,
    cached: Option<String>,
}

impl RawAction {
    fn from_row(r: &SqlRow<'_>) -> rusqlite::Result<Self> {
        let snapshot_id: Option<String> = r.get(5)?;
        Ok(Self {
            id: parse_id(&r.get::<_, String>(0)?)?,
            table_id: parse_id(&r.get::<_, String>(1)?)?,
            order: r.get(2)?,
            name: r.get(3)?,
            parameters: r.get(4)?,
            snapshot_id: snapshot_id.as_deref().map(parse_id).transpose()?,
            cached: r.get(6)?,
        })
    }

    fn decode(self) -> Result<ActionRecord> {
        Ok(ActionRecord {
            id: self.id,
            table_id: self.table_id,
            order: self.order,
            name: self.name,
            parameters: serde_json::from_str(&self.parameters)?,
            snapshot_id: self.snapshot_id,
            cached: self.cached.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}

fn insert_table_tx(conn: &Connection, table: &TableRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO tables (id, name, properties, joined_from) VALUES (?1, ?2, ?3, ?4)",
        params![
            table.id.to_string(),
            &table.name,
            serde_json::to_string(&table.properties)?,
            table.joined_from.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn insert_snapshot_tx(conn: &Connection, snapshot: &Snapshot) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO snapshots (id, table_id, version, data_rows, data_columns, column_stats)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            snapshot.id.to_string(),
            snapshot.table_id.to_string(),
            snapshot.version,
            serde_json::to_string(&snapshot.rows)?,
            serde_json::to_string(&snapshot.columns)?,
            serde_json::to_string(&snapshot.column_stats)?,
        ],
    )?;
    Ok(())
}

fn get_action_tx(conn: &Connection, id: Uuid) -> Result<ActionRecord> {
    let raw = conn
        .query_row(
            &format!("{ACTION_SELECT} WHERE id = ?1"),
            params![id.to_string()],
            RawAction::from_row,
        )
        .optional()?;
    raw.ok_or(StorageError::NotFound { entity: "action", id })?.decode()
}

impl Repository for Storage {
    fn insert_table(&self, table: &TableRecord) -> RepoResult<()> {
        Ok(Storage::insert_table(self, table)?)
    }

    fn get_table(&self, id: Uuid) -> RepoResult<TableRecord> {
        Ok(Storage::get_table(self, id)?)
    }

    fn latest_snapshot(&self, table_id: Uuid) -> RepoResult<Option<Snapshot>> {
        Ok(Storage::latest_snapshot(self, table_id)?)
    }

    fn snapshot_by_version(&self, table_id: Uuid, version: u32) -> RepoResult<Option<Snapshot>> {
        Ok(Storage::snapshot_by_version(self, table_id, version)?)
    }

    fn insert_snapshot(&self, snapshot: &Snapshot) -> RepoResult<()> {
        Ok(Storage::insert_snapshot(self, snapshot)?)
    }

    fn insert_action(&self, action: &ActionRecord) -> RepoResult<()> {
        Ok(Storage::insert_action(self, action)?)
    }

    fn get_action(&self, id: Uuid) -> RepoResult<ActionRecord> {
        Ok(Storage::get_action(self, id)?)
    }

    fn update_action(&self, action: &ActionRecord) -> RepoResult<()> {
        Ok(Storage::update_action(self, action)?)
    }

    fn cache_action_stats(&self, id: Uuid, cache: &StatsCache) -> RepoResult<()> {
        Ok(Storage::cache_action_stats(self, id, cache)?)
    }

    fn pending_actions(&self, table_id: Uuid, max_order: Option<u32>) -> RepoResult<Vec<ActionRecord>> {
        Ok(Storage::pending_actions(self, table_id, max_order)?)
    }

    fn commit_flush(&self, snapshot: &Snapshot, applied: &[Uuid]) -> RepoResult<()> {
        Ok(Storage::commit_flush(self, snapshot, applied)?)
    }

    fn insert_join(&self, table: &TableRecord, join: &JoinRecord) -> RepoResult<()> {
        Ok(Storage::insert_join(self, table, join)?)
    }

    fn get_join(&self, table_id: Uuid) -> RepoResult<Option<JoinRecord>> {
        Ok(Storage::get_join(self, table_id)?)
    }
}
