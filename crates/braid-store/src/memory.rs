use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{ExecutionState, StateStore, StoreError};

/// In-memory store. Snapshots are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
  executions: RwLock<HashMap<String, ExecutionState>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    self.executions.read().await.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.executions.read().await.is_empty()
  }
}

#[async_trait]
impl StateStore for MemoryStore {
  async fn save(&self, state: &ExecutionState) -> Result<(), StoreError> {
    self
      .executions
      .write()
      .await
      .insert(state.execution_id.clone(), state.clone());
    Ok(())
  }

  async fn load(&self, execution_id: &str) -> Result<ExecutionState, StoreError> {
    self
      .executions
      .read()
      .await
      .get(execution_id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
  }

  async fn list(&self, workflow_id: &str) -> Result<Vec<ExecutionState>, StoreError> {
    let mut states: Vec<ExecutionState> = self
      .executions
      .read()
      .await
      .values()
      .filter(|s| s.workflow_id == workflow_id)
      .cloned()
      .collect();
    states.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(states)
  }
}
