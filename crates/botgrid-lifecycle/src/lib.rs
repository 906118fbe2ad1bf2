//! botgrid-lifecycle — mounting workloads into the local runtime.
//!
//! The [`LifecycleManager`] owns this process's mounted-state map and drives
//! the runtime loaders, hooks and health counters for one workload at a
//! time. A [`LifecycleHandle`] exposes the same operations wrapped by a
//! cluster dispatcher, which is how the rest of the system reaches them.
//!
//! ```text
//! LifecycleHandle::mount ──broadcast──▶ LifecycleManager::mount_local (every node)
//!                                         ├── WorkloadRuntime::load_*
//!                                         ├── dependency cache → data dir
//!                                         ├── HookRunner::after_mount
//!                                         └── HealthRegistry::set_status(healthy)
//! ```

pub mod handle;
pub mod manager;
pub mod registry;

pub use handle::LifecycleHandle;
pub use manager::{DEPENDENCY_ARCHIVE, LifecycleManager};
pub use registry::WorkloadRegistry;
