//! In-memory WorkspaceService.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{StateError, StateResult};
use crate::traits::WorkspaceService;
use crate::types::{Collaborator, DEFAULT_WORKSPACE, Stage, WorkloadId, WorkspaceId};

/// A workspace definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Vec<Stage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_prefix: Option<String>,
    #[serde(default)]
    pub collaborators: Vec<Collaborator>,
    #[serde(default)]
    pub workloads: Vec<WorkloadId>,
}

impl Workspace {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_pipeline(mut self, stages: Vec<Stage>) -> Self {
        self.pipeline = Some(stages);
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.workload_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_collaborator(mut self, collaborator: Collaborator) -> Self {
        self.collaborators.push(collaborator);
        self
    }
}

/// Workspaces held in process memory. The default workspace always exists.
#[derive(Debug, Clone)]
pub struct MemoryWorkspaces {
    inner: Arc<RwLock<HashMap<WorkspaceId, Workspace>>>,
}

impl Default for MemoryWorkspaces {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(
            DEFAULT_WORKSPACE.to_string(),
            Workspace::new(DEFAULT_WORKSPACE),
        );
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }
}

impl MemoryWorkspaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workspace.
    pub async fn upsert(&self, workspace: Workspace) {
        self.inner
            .write()
            .await
            .insert(workspace.id.clone(), workspace);
    }

    pub async fn get(&self, workspace_id: &str) -> Option<Workspace> {
        self.inner.read().await.get(workspace_id).cloned()
    }
}

#[async_trait]
impl WorkspaceService for MemoryWorkspaces {
    async fn pipeline(&self, workspace_id: &str) -> StateResult<Option<Vec<Stage>>> {
        Ok(self
            .inner
            .read()
            .await
            .get(workspace_id)
            .and_then(|ws| ws.pipeline.clone()))
    }

    async fn workspace_of(&self, workload_id: &str) -> StateResult<WorkspaceId> {
        let map = self.inner.read().await;
        let mut ids: Vec<&WorkspaceId> = map
            .values()
            .filter(|ws| ws.workloads.iter().any(|w| w == workload_id))
            .map(|ws| &ws.id)
            .collect();
        ids.sort();
        Ok(ids
            .first()
            .map(|id| id.to_string())
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()))
    }

    async fn workload_refs(&self, workspace_id: &str) -> StateResult<Vec<WorkloadId>> {
        Ok(self
            .inner
            .read()
            .await
            .get(workspace_id)
            .map(|ws| ws.workloads.clone())
            .unwrap_or_default())
    }

    async fn add_workload_ref(&self, workload_id: &str, workspace_id: &str) -> StateResult<()> {
        let mut map = self.inner.write().await;
        let ws = map
            .get_mut(workspace_id)
            .ok_or_else(|| StateError::NotFound(format!("workspace {workspace_id}")))?;
        if !ws.workloads.iter().any(|w| w == workload_id) {
            ws.workloads.push(workload_id.to_string());
        }
        Ok(())
    }

    async fn remove_workload_ref(&self, workload_id: &str) -> StateResult<()> {
        let mut map = self.inner.write().await;
        for ws in map.values_mut() {
            ws.workloads.retain(|w| w != workload_id);
        }
        Ok(())
    }

    async fn collaborators(&self, workspace_id: &str) -> StateResult<Vec<Collaborator>> {
        Ok(self
            .inner
            .read()
            .await
            .get(workspace_id)
            .map(|ws| ws.collaborators.clone())
            .unwrap_or_default())
    }

    async fn workload_prefix(&self, workspace_id: &str) -> StateResult<Option<String>> {
        Ok(self
            .inner
            .read()
            .await
            .get(workspace_id)
            .and_then(|ws| ws.workload_prefix.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageAction;

    fn stage(id: &str, action: StageAction) -> Stage {
        Stage {
            id: id.to_string(),
            label: id.to_string(),
            action,
        }
    }

    #[tokio::test]
    async fn unreferenced_workload_belongs_to_default() {
        let ws = MemoryWorkspaces::new();
        assert_eq!(ws.workspace_of("s1x").await.unwrap(), DEFAULT_WORKSPACE);
    }

    #[tokio::test]
    async fn refs_are_added_and_removed() {
        let ws = MemoryWorkspaces::new();
        ws.upsert(Workspace::new("team")).await;
        ws.add_workload_ref("s1x", "team").await.unwrap();
        ws.add_workload_ref("s1x", "team").await.unwrap();
        assert_eq!(ws.workload_refs("team").await.unwrap(), vec!["s1x"]);
        assert_eq!(ws.workspace_of("s1x").await.unwrap(), "team");

        ws.remove_workload_ref("s1x").await.unwrap();
        assert!(ws.workload_refs("team").await.unwrap().is_empty());
        assert!(ws.add_workload_ref("s1x", "ghost").await.is_err());
    }

    #[tokio::test]
    async fn pipeline_needs_two_stages() {
        let ws = MemoryWorkspaces::new();
        assert!(!ws.has_pipeline(DEFAULT_WORKSPACE).await.unwrap());

        ws.upsert(
            Workspace::new("single").with_pipeline(vec![stage("dev", StageAction::PromoteMove)]),
        )
        .await;
        assert!(!ws.has_pipeline("single").await.unwrap());

        ws.upsert(Workspace::new("multi").with_pipeline(vec![
            stage("dev", StageAction::PromoteMove),
            stage("prod", StageAction::PromoteCopy),
        ]))
        .await;
        assert!(ws.has_pipeline("multi").await.unwrap());
    }
}
