use crate::config::TableProperties;
use crate::join::{JoinClause, JoinType};
use crate::stats::ColumnStats;
use crate::value::{ColumnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

static NULL: Value = Value::Null;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Stable identifier, unique within a table state.
    pub key: String,
    /// Display label. Renaming a column only touches this.
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(key: impl Into<String>, label: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            column_type,
        }
    }
}

/// One table row: cells keyed by column key plus a row-local `key`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: String,
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder-style cell setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Missing cells read as null.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }
}

/// Immutable, versioned materialization of a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub table_id: Uuid,
    pub version: u32,
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
    /// Parallel to `columns`.
    pub column_stats: Vec<ColumnStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: Uuid,
    pub name: String,
    pub properties: TableProperties,
    /// Set for tables produced by a join. Informational only; row data lives
    /// in the table's snapshots.
    pub joined_from: Option<Uuid>,
}

impl TableRecord {
    pub fn new(name: impl Into<String>, properties: TableProperties) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            properties,
            joined_from: None,
        }
    }
}

/// Columns and stats computed for a pending action chain by the background
/// stats pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatsCache {
    pub columns: Vec<Column>,
    pub column_stats: Vec<ColumnStats>,
}

/// Persisted action. `table_id`, `order`, `name` and `parameters` never
/// change once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub table_id: Uuid,
    pub order: u32,
    pub name: String,
    pub parameters: Vec<String>,
    /// Snapshot this action was folded into; `None` while pending.
    pub snapshot_id: Option<Uuid>,
    pub cached: Option<StatsCache>,
}

impl ActionRecord {
    pub fn new(table_id: Uuid, order: u32, name: impl Into<String>, parameters: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            table_id,
            order,
            name: name.into(),
            parameters,
            snapshot_id: None,
            cached: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.snapshot_id.is_none()
    }

    /// Name of the first creation-time field that differs from `stored`.
    pub fn changed_creation_field(&self, stored: &ActionRecord) -> Option<&'static str> {
        if self.table_id != stored.table_id {
            Some("table_id")
        } else if self.order != stored.order {
            Some("order")
        } else if self.name != stored.name {
            Some("name")
        } else if self.parameters != stored.parameters {
            Some("parameters")
        } else {
            None
        }
    }
}

/// A join definition, paired 1:1 with the table holding its result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinRecord {
    pub id: Uuid,
    pub table_id: Uuid,
    pub source_table_id: Uuid,
    pub target_table_id: Uuid,
    pub join_type: JoinType,
    pub clauses: Vec<JoinClause>,
    /// Appended to target column keys that collide with source keys.
    pub suffix: String,
}
