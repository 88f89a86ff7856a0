//! Braid Store
//!
//! This crate provides the persistence layer for execution state. The engine
//! saves a full [`ExecutionState`] snapshot after every state-affecting event,
//! and awaits each save before continuing, so a crash loses at most the
//! progress of steps that were in flight.
//!
//! Implementations:
//! - [`MemoryStore`] keeps snapshots in memory (tests, embedding)
//! - [`SqliteStore`] keeps one row per execution in SQLite

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  ExecutionState, ExecutionStatus, PendingInput, StepError, StepErrorKind, StepState, StepStatus,
  derive_status,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested execution was not found.
  #[error("execution not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Schema migration failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  /// A stored snapshot could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Durable storage for execution state.
///
/// Writes for one `execution_id` come from a single writer, in order. A save
/// replaces the previous snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
  /// Persist a snapshot of an execution.
  async fn save(&self, state: &ExecutionState) -> Result<(), StoreError>;

  /// Load the latest snapshot of an execution.
  async fn load(&self, execution_id: &str) -> Result<ExecutionState, StoreError>;

  /// List executions of a workflow, oldest first.
  async fn list(&self, workflow_id: &str) -> Result<Vec<ExecutionState>, StoreError>;
}
