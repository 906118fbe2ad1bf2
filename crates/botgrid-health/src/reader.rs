//! Fleet-wide health aggregation.

use std::sync::Arc;

use botgrid_state::{HealthSnapshot, SharedStore, StateError, StateResult, WorkspaceService};
use tracing::warn;

use crate::publisher::{HealthPublisher, health_key};

/// Merges every live health snapshot for a workspace.
pub struct HealthReader {
    shared: Option<Arc<dyn SharedStore>>,
    workspaces: Arc<dyn WorkspaceService>,
    local: Arc<HealthPublisher>,
}

impl HealthReader {
    pub fn new(
        shared: Option<Arc<dyn SharedStore>>,
        workspaces: Arc<dyn WorkspaceService>,
        local: Arc<HealthPublisher>,
    ) -> Self {
        Self {
            shared,
            workspaces,
            local,
        }
    }

    /// One snapshot per live process, each filtered to the workloads of
    /// `workspace_id`.
    ///
    /// Without a reachable shared store the local snapshot is returned
    /// alone. Expired snapshots are simply absent.
    pub async fn aggregate(&self, workspace_id: &str) -> StateResult<Vec<HealthSnapshot>> {
        let refs = self.workspaces.workload_refs(workspace_id).await?;

        let mut snapshots = match &self.shared {
            Some(shared) => match self.read_shared(shared.as_ref()).await {
                Ok(snapshots) => snapshots,
                Err(StateError::Unavailable(reason)) => {
                    warn!(%reason, "shared store unreachable, reporting local health only");
                    vec![self.local.local_snapshot()]
                }
                Err(e) => return Err(e),
            },
            None => vec![self.local.local_snapshot()],
        };

        for snapshot in &mut snapshots {
            snapshot.workloads.retain(|id, _| refs.contains(id));
        }
        Ok(snapshots)
    }

    async fn read_shared(&self, shared: &dyn SharedStore) -> StateResult<Vec<HealthSnapshot>> {
        let keys = shared.keys(&health_key("*")).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values = shared.mget(&keys).await?;
        let mut snapshots = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            // Expired between KEYS and MGET.
            let Some(raw) = value else { continue };
            match serde_json::from_slice::<HealthSnapshot>(&raw) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(%key, error = %e, "skipping unreadable health snapshot"),
            }
        }
        Ok(snapshots)
    }
}
