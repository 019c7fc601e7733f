use crate::extract::ExtractionError;
use thiserror::Error;
use uuid::Uuid;

/// Validation and execution failures of a single action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("invalid parameter {index}: {reason}")]
    InvalidParameters { index: usize, reason: String },

    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("table has no snapshot")]
    MissingSnapshot,

    #[error("action failed validation and cannot be applied")]
    NotValid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("unsupported join: {reason}")]
    UnsupportedJoin { reason: String },

    #[error("unknown column '{column}' in {side} table")]
    UnknownColumn { side: &'static str, column: String },
}

/// Failures reported by a [`Repository`](crate::Repository) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("field '{field}' cannot change after creation")]
    ImmutableFieldViolation { field: &'static str },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("unknown action name '{0}'")]
    UnknownAction(String),

    #[error("table {0} has no snapshot")]
    MissingSnapshot(Uuid),

    #[error("action order {order} on table {table} must follow pending order {last}")]
    OutOfOrder { table: Uuid, order: u32, last: u32 },

    #[error("table {0} was not produced by a join")]
    NotJoined(Uuid),
}

pub type Result<T> = std::result::Result<T, EngineError>;
