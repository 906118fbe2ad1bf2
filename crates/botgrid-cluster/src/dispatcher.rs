//! Dispatcher trait and the single-process implementation.

use std::future::Future;
use std::sync::Arc;

use botgrid_state::{GridResult, ServerId, WorkloadId};
use futures::FutureExt;

pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

/// Arguments of a broadcast workload operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetCall {
    pub workload_id: WorkloadId,
    /// Process that initiated the broadcast.
    pub origin: ServerId,
}

impl FleetCall {
    pub fn new(workload_id: impl Into<WorkloadId>, origin: impl Into<ServerId>) -> Self {
        Self {
            workload_id: workload_id.into(),
            origin: origin.into(),
        }
    }
}

/// A workload operation, local or broadcast. Resolves to `true` when the
/// operation succeeded everywhere it ran.
pub type FleetFn = Arc<dyn Fn(FleetCall) -> BoxFuture<GridResult<bool>> + Send + Sync>;

/// Build a [`FleetFn`] from an async closure.
pub fn fleet_fn<F, Fut>(f: F) -> FleetFn
where
    F: Fn(FleetCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GridResult<bool>> + Send + 'static,
{
    Arc::new(move |call| f(call).boxed())
}

/// Wraps a local operation so invoking it runs on every reachable process.
///
/// No ordering is guaranteed between processes.
pub trait ClusterDispatcher: Send + Sync {
    fn broadcast(&self, name: &str, local: FleetFn) -> FleetFn;
}

/// Dispatcher for a single-process deployment: broadcast is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDispatcher;

impl ClusterDispatcher for LocalDispatcher {
    fn broadcast(&self, _name: &str, local: FleetFn) -> FleetFn {
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn local_broadcast_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let local = fleet_fn(move |call: FleetCall| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(call.workload_id == "s1x")
            }
        });

        let wrapped = LocalDispatcher.broadcast("mount", local);
        assert!(wrapped(FleetCall::new("s1x", "n")).await.unwrap());
        assert!(!wrapped(FleetCall::new("other", "n")).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
