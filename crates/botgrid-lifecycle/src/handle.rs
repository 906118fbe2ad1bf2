//! Fleet-wide lifecycle operations.

use std::sync::Arc;

use botgrid_cluster::{ClusterDispatcher, FleetCall, FleetFn, fleet_fn};
use botgrid_state::GridResult;

use crate::manager::LifecycleManager;

/// Broadcast wrappers around a [`LifecycleManager`].
///
/// Every call runs the local operation on each reachable process. The
/// returned boolean is true only if every process succeeded.
#[derive(Clone)]
pub struct LifecycleHandle {
    manager: Arc<LifecycleManager>,
    mount: FleetFn,
    unmount: FleetFn,
    sync_libs: FleetFn,
}

impl LifecycleHandle {
    pub fn new(manager: Arc<LifecycleManager>, dispatcher: &dyn ClusterDispatcher) -> Self {
        let m = manager.clone();
        let mount = dispatcher.broadcast(
            "mount",
            fleet_fn(move |call: FleetCall| {
                let m = m.clone();
                async move { m.mount_local(&call.workload_id).await }
            }),
        );

        let m = manager.clone();
        let unmount = dispatcher.broadcast(
            "unmount",
            fleet_fn(move |call: FleetCall| {
                let m = m.clone();
                async move {
                    m.unmount_local(&call.workload_id).await?;
                    Ok(true)
                }
            }),
        );

        let m = manager.clone();
        let sync_libs = dispatcher.broadcast(
            "sync_libs",
            fleet_fn(move |call: FleetCall| {
                let m = m.clone();
                async move { m.sync_libs_local(&call.workload_id, &call.origin).await }
            }),
        );

        Self {
            manager,
            mount,
            unmount,
            sync_libs,
        }
    }

    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    fn call(&self, workload_id: &str) -> FleetCall {
        FleetCall::new(workload_id, self.manager.server_id())
    }

    /// Mount on every process.
    pub async fn mount(&self, workload_id: &str) -> GridResult<bool> {
        (self.mount)(self.call(workload_id)).await
    }

    /// Unmount on every process.
    pub async fn unmount(&self, workload_id: &str) -> GridResult<()> {
        (self.unmount)(self.call(workload_id)).await.map(|_| ())
    }

    /// Extract the workload's dependency cache on every other process.
    pub async fn sync_libs(&self, workload_id: &str) -> GridResult<bool> {
        (self.sync_libs)(self.call(workload_id)).await
    }
}
