//! Versioned transformation engine for tabular data.
//!
//! A table is an immutable chain of snapshots plus pending actions:
//! - Actions are validated against the table's projected columns and stored unapplied.
//! - Projection replays pending actions over the latest snapshot without persisting anything.
//! - Flushing composes pending actions once and writes the next snapshot version.
//! - Statistics are recomputed only for columns an action touched.
//! - Two tables can be combined with a hash-based equi-join into a new table.

#![forbid(unsafe_code)]

mod action;
mod compose;
mod config;
mod engine;
mod error;
mod extract;
mod join;
mod model;
mod registry;
mod repository;
mod stats;
mod table;
mod tasks;
mod value;

pub use crate::action::{Action, ActionKind, ActionParams, ColumnEffect, ParamType, Transform};
pub use crate::compose::{compose, ComposedAction};
pub use crate::config::{EngineConfig, TableProperties};
pub use crate::engine::{Engine, JoinSpec};
pub use crate::error::{ActionError, EngineError, JoinError, RepositoryError, Result};
pub use crate::extract::{CsvExtractor, Extracted, ExtractionError, Extractor};
pub use crate::join::{
    build_index, check_clause_columns, hash_join, perform_join, supported_clause, target_key_map,
    JoinClause, JoinInput, JoinOperation, JoinOutput, JoinType,
};
pub use crate::model::{ActionRecord, Column, JoinRecord, Row, Snapshot, StatsCache, TableRecord};
pub use crate::registry::{ActionRegistry, ActionRegistryBuilder, RegistryError};
pub use crate::repository::{InMemoryRepository, RepoResult, Repository};
pub use crate::stats::{
    calculate_column_stats, calculate_values_stats, recalculate_stats, ColumnStats, NumericStats,
    StatsSummary, TextStats,
};
pub use crate::table::{Materialized, Projection, TableState};
pub use crate::tasks::{DeferredTasks, Task, TaskQueue};
pub use crate::value::{ColumnType, ParseColumnTypeError, Value};
