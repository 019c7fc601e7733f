//! Hash-based equi-join of two table states.
//!
//! Only INNER joins with a single equality clause are supported. The target
//! table is indexed by the stringified join value, then source rows are
//! streamed once against the index, so the cost is O(S + T) instead of the
//! O(S × T) of a nested loop.

use crate::error::JoinError;
use crate::model::{Column, Row};
use crate::stats::ColumnStats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOperation {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClause {
    pub source_column: String,
    pub target_column: String,
    pub operation: JoinOperation,
}

impl JoinClause {
    pub fn equal(source_column: impl Into<String>, target_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
            operation: JoinOperation::Equal,
        }
    }
}

/// Borrowed view of one side of a join.
#[derive(Clone, Copy, Debug)]
pub struct JoinInput<'a> {
    pub columns: &'a [Column],
    pub rows: &'a [Row],
    pub column_stats: &'a [ColumnStats],
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinOutput {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub column_stats: Vec<ColumnStats>,
}

/// The single equality clause of a supported join.
pub fn supported_clause(join_type: JoinType, clauses: &[JoinClause]) -> Result<&JoinClause, JoinError> {
    if join_type != JoinType::Inner {
        return Err(JoinError::UnsupportedJoin {
            reason: format!("{join_type:?} joins are not implemented"),
        });
    }
    let [clause] = clauses else {
        return Err(JoinError::UnsupportedJoin {
            reason: format!("expected exactly one clause, got {}", clauses.len()),
        });
    };
    if clause.operation != JoinOperation::Equal {
        return Err(JoinError::UnsupportedJoin {
            reason: format!("{:?} clauses are not implemented", clause.operation),
        });
    }
    Ok(clause)
}

/// Check that the clause columns exist on both sides.
pub fn check_clause_columns(
    clause: &JoinClause,
    source_columns: &[Column],
    target_columns: &[Column],
) -> Result<(), JoinError> {
    if !source_columns.iter().any(|c| c.key == clause.source_column) {
        return Err(JoinError::UnknownColumn {
            side: "source",
            column: clause.source_column.clone(),
        });
    }
    if !target_columns.iter().any(|c| c.key == clause.target_column) {
        return Err(JoinError::UnknownColumn {
            side: "target",
            column: clause.target_column.clone(),
        });
    }
    Ok(())
}

pub fn perform_join(
    join_type: JoinType,
    clauses: &[JoinClause],
    source: JoinInput<'_>,
    target: JoinInput<'_>,
    suffix: &str,
) -> Result<JoinOutput, JoinError> {
    let clause = supported_clause(join_type, clauses)?;
    check_clause_columns(clause, source.columns, target.columns)?;
    Ok(hash_join(clause, source, target, suffix))
}

/// Index row positions by the stringified value of `column`. Null values
/// never match and are left out.
pub fn build_index(rows: &[Row], column: &str) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (pos, row) in rows.iter().enumerate() {
        if let Some(key) = row.get(column).to_text() {
            index.entry(key).or_default().push(pos);
        }
    }
    index
}

/// Target column key → key in the joined table. Target keys that collide with
/// a source key get `suffix` appended, followed by a counter when that name
/// is taken as well.
pub fn target_key_map(
    source_columns: &[Column],
    target_columns: &[Column],
    suffix: &str,
) -> HashMap<String, String> {
    let source_keys: HashSet<&str> = source_columns.iter().map(|c| c.key.as_str()).collect();
    let mut taken: HashSet<String> = source_columns
        .iter()
        .chain(target_columns)
        .map(|c| c.key.clone())
        .collect();
    target_columns
        .iter()
        .map(|c| {
            if !source_keys.contains(c.key.as_str()) {
                return (c.key.clone(), c.key.clone());
            }
            let mut renamed = format!("{}{suffix}", c.key);
            let mut n = 1;
            while taken.contains(&renamed) {
                n += 1;
                renamed = format!("{}{suffix}{n}", c.key);
            }
            taken.insert(renamed.clone());
            (c.key.clone(), renamed)
        })
        .collect()
}

pub fn hash_join(
    clause: &JoinClause,
    source: JoinInput<'_>,
    target: JoinInput<'_>,
    suffix: &str,
) -> JoinOutput {
    let index = build_index(target.rows, &clause.target_column);
    let key_map = target_key_map(source.columns, target.columns, suffix);
    let rename = |key: &str| key_map.get(key).cloned().unwrap_or_else(|| key.to_string());

    let mut columns = source.columns.to_vec();
    columns.extend(target.columns.iter().map(|c| Column {
        key: rename(&c.key),
        ..c.clone()
    }));

    // Stats are concatenated, not recomputed over the joined rows.
    let mut column_stats = source.column_stats.to_vec();
    column_stats.extend(target.column_stats.iter().map(|s| ColumnStats {
        key: rename(&s.key),
        ..s.clone()
    }));

    let mut rows = Vec::new();
    for source_row in source.rows {
        let Some(value) = source_row.get(&clause.source_column).to_text() else {
            continue;
        };
        let Some(matches) = index.get(&value) else {
            continue;
        };
        for &pos in matches {
            let mut joined = Row::new(rows.len().to_string());
            joined.values = source_row.values.clone();
            for (key, value) in &target.rows[pos].values {
                joined.values.insert(rename(key), value.clone());
            }
            rows.push(joined);
        }
    }

    log::debug!(
        "hash join matched {} rows from {} source and {} target rows",
        rows.len(),
        source.rows.len(),
        target.rows.len()
    );

    JoinOutput {
        columns,
        rows,
        column_stats,
    }
}
