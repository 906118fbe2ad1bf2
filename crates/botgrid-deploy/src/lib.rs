//! botgrid-deploy — everything that changes what a workload *is*.
//!
//! Revisions snapshot and restore a workload's tree, the transfer manager
//! moves trees in and out as portable archives, the workload manager
//! creates, edits and deletes workloads, and the promotion pipeline drives
//! a workload through its workspace's stages.
//!
//! All of them share a [`DeployContext`] of collaborators and reach
//! mount/unmount through the fleet-wide [`LifecycleHandle`](botgrid_lifecycle::LifecycleHandle).

pub mod context;
pub mod pipeline;
pub mod revision;
pub mod transfer;
pub mod workloads;

#[cfg(test)]
pub(crate) mod testing;

pub use context::DeployContext;
pub use pipeline::PromotionPipeline;
pub use revision::{REVISION_SEPARATOR, REVISIONS_NAMESPACE, RevisionManager, RevisionName};
pub use transfer::{ImportOutcome, PLACEHOLDER, TransferManager};
pub use workloads::{WorkloadManager, WorkloadUpdate};
