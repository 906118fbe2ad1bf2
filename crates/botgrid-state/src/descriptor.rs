//! ConfigStore over the descriptor file of a workload tree.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StateError, StateResult};
use crate::traits::{ConfigStore, ContentStore};
use crate::types::{DESCRIPTOR_FILE, WorkloadConfig};

/// Reads and writes `workload.config.json` through a [`ContentStore`].
#[derive(Clone)]
pub struct DescriptorConfigStore {
    content: Arc<dyn ContentStore>,
}

impl DescriptorConfigStore {
    pub fn new(content: Arc<dyn ContentStore>) -> Self {
        Self { content }
    }

    async fn read_value(&self, workload_id: &str) -> StateResult<Value> {
        let raw = self
            .content
            .read_file(workload_id, DESCRIPTOR_FILE)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("workload {workload_id}")))?;
        serde_json::from_slice(&raw).map_err(|e| StateError::Deserialize(e.to_string()))
    }
}

#[async_trait]
impl ConfigStore for DescriptorConfigStore {
    async fn get(&self, workload_id: &str) -> StateResult<WorkloadConfig> {
        let value = self.read_value(workload_id).await?;
        serde_json::from_value(value).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    async fn set(&self, workload_id: &str, config: &WorkloadConfig) -> StateResult<()> {
        let raw =
            serde_json::to_vec_pretty(config).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.content
            .write_file(workload_id, DESCRIPTOR_FILE, &raw)
            .await
    }

    async fn merge(&self, workload_id: &str, partial: Value) -> StateResult<WorkloadConfig> {
        let mut current = self.read_value(workload_id).await?;
        merge_json(&mut current, partial);
        let config: WorkloadConfig =
            serde_json::from_value(current).map_err(|e| StateError::Deserialize(e.to_string()))?;
        self.set(workload_id, &config).await?;
        Ok(config)
    }
}

/// Recursively merge `patch` into `target`. Objects merge key by key;
/// anything else replaces the target value.
pub fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
