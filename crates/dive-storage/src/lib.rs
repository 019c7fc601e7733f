//! SQLite-backed storage for the dive transformation engine.
//!
//! This crate exposes:
//! - SQLite schema creation/migration
//! - A [`dive_core::Repository`] implementation with transactional flush and join writes
//! - A background worker that runs deferred engine tasks on the blocking pool

mod schema;
pub mod storage;
mod worker;

pub use storage::{Storage, StorageConfig, StorageError};
pub use worker::{task_channel, TaskReceiver, TaskSender, TaskWorker, WorkerError};
