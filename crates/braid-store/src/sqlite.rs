use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::{ExecutionState, StateStore, StoreError};

/// SQLite-based store implementation.
///
/// Each execution is one row holding its latest snapshot as JSON, next to
/// the columns needed for lookups.
pub struct SqliteStore {
  pool: SqlitePool,
}

#[derive(FromRow)]
struct StateRow {
  state: Json<ExecutionState>,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) a database file and run migrations.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Connect using a `sqlite:` URL and run migrations.
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // An in-memory database exists per connection.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect_with(options)
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl StateStore for SqliteStore {
  async fn save(&self, state: &ExecutionState) -> Result<(), StoreError> {
    sqlx::query(
      r#"
            INSERT INTO executions (execution_id, workflow_id, status, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (execution_id) DO UPDATE SET
              status = excluded.status,
              state = excluded.state,
              updated_at = excluded.updated_at
            "#,
    )
    .bind(&state.execution_id)
    .bind(&state.workflow_id)
    .bind(state.status.as_str())
    .bind(Json(state))
    .bind(state.created_at)
    .bind(state.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn load(&self, execution_id: &str) -> Result<ExecutionState, StoreError> {
    let row: Option<StateRow> = sqlx::query_as(
      r#"
            SELECT state
            FROM executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(|r| r.state.0)
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
  }

  async fn list(&self, workflow_id: &str) -> Result<Vec<ExecutionState>, StoreError> {
    let rows: Vec<StateRow> = sqlx::query_as(
      r#"
            SELECT state
            FROM executions
            WHERE workflow_id = ?
            ORDER BY created_at ASC
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.state.0).collect())
  }
}
