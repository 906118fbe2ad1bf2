//! Cached index of registered workloads.

use std::sync::{Arc, Mutex};

use botgrid_state::{
    ConfigStore, ContentStore, DESCRIPTOR_FILE, StateError, StateResult, WorkloadConfig,
    WorkloadId,
};
use tracing::{debug, warn};

/// Lists workloads (those with a descriptor) and caches the id list until
/// invalidated.
pub struct WorkloadRegistry {
    content: Arc<dyn ContentStore>,
    configs: Arc<dyn ConfigStore>,
    cache: Mutex<Option<Vec<WorkloadId>>>,
}

impl WorkloadRegistry {
    pub fn new(content: Arc<dyn ContentStore>, configs: Arc<dyn ConfigStore>) -> Self {
        Self {
            content,
            configs,
            cache: Mutex::new(None),
        }
    }

    /// Ids of every registered workload.
    pub async fn ids(&self, ignore_cache: bool) -> StateResult<Vec<WorkloadId>> {
        if !ignore_cache {
            if let Some(ids) = self.cached() {
                return Ok(ids);
            }
        }
        let ids = self.content.list_workloads_with(DESCRIPTOR_FILE).await?;
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(ids.clone());
        debug!(count = ids.len(), "workload ids refreshed");
        Ok(ids)
    }

    fn cached(&self) -> Option<Vec<WorkloadId>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forget the cached id list.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub async fn exists(&self, workload_id: &str, ignore_cache: bool) -> StateResult<bool> {
        Ok(self
            .ids(ignore_cache)
            .await?
            .iter()
            .any(|id| id == workload_id))
    }

    /// Configuration of a workload, or `None` (with a warning) when it has
    /// no descriptor.
    pub async fn find(&self, workload_id: &str) -> StateResult<Option<WorkloadConfig>> {
        if !self.content.file_exists(workload_id, DESCRIPTOR_FILE).await? {
            warn!(%workload_id, "workload not found, make sure it exists in the content store");
            return Ok(None);
        }
        match self.configs.get(workload_id).await {
            Ok(config) => Ok(Some(config)),
            Err(StateError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Configurations of the given workloads, skipping missing ones.
    pub async fn find_many(&self, workload_ids: &[WorkloadId]) -> StateResult<Vec<WorkloadConfig>> {
        let mut configs = Vec::with_capacity(workload_ids.len());
        for id in workload_ids {
            if let Some(config) = self.find(id).await? {
                configs.push(config);
            }
        }
        Ok(configs)
    }

    /// Configurations of every registered workload.
    pub async fn all(&self) -> StateResult<Vec<WorkloadConfig>> {
        let ids = self.ids(false).await?;
        self.find_many(&ids).await
    }
}
