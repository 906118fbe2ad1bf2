//! Collaborators shared by the deployment managers.

use std::sync::Arc;

use botgrid_lifecycle::LifecycleHandle;
use botgrid_state::{
    ArchiveStore, ConfigStore, ContentStore, DESCRIPTOR_FILE, GridError, GridResult, HookRunner,
    Stage, WorkloadConfig, WorkspaceService,
};

#[derive(Clone)]
pub struct DeployContext {
    pub content: Arc<dyn ContentStore>,
    pub configs: Arc<dyn ConfigStore>,
    pub archives: Arc<dyn ArchiveStore>,
    pub workspaces: Arc<dyn WorkspaceService>,
    pub hooks: Arc<dyn HookRunner>,
    pub lifecycle: LifecycleHandle,
}

impl DeployContext {
    /// Whether the workload's descriptor exists. Never cached.
    pub async fn exists(&self, workload_id: &str) -> GridResult<bool> {
        Ok(self.content.file_exists(workload_id, DESCRIPTOR_FILE).await?)
    }

    pub async fn ensure_exists(&self, workload_id: &str) -> GridResult<()> {
        if self.exists(workload_id).await? {
            Ok(())
        } else {
            Err(GridError::not_found(format!(
                "workload \"{workload_id}\" doesn't exist"
            )))
        }
    }

    pub async fn config(&self, workload_id: &str) -> GridResult<WorkloadConfig> {
        Ok(self.configs.get(workload_id).await?)
    }

    /// Pipeline of the workload's workspace, if that workspace has more
    /// than one stage.
    pub async fn active_pipeline(&self, workload_id: &str) -> GridResult<Option<Vec<Stage>>> {
        let workspace_id = self.workspaces.workspace_of(workload_id).await?;
        if !self.workspaces.has_pipeline(&workspace_id).await? {
            return Ok(None);
        }
        Ok(self.workspaces.pipeline(&workspace_id).await?)
    }

    pub fn invalidate_ids(&self) {
        self.lifecycle.manager().registry().invalidate();
    }
}
