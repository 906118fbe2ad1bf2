//! botgrid-state — domain types, configuration and persistence for BotGrid.
//!
//! Backed by [redb](https://docs.rs/redb), the [`StateStore`] keeps every
//! workload's file tree and the global revision/export archives. The
//! collaborator traits in [`traits`] are what the lifecycle and deployment
//! crates program against; in-memory implementations of the fleet-shared
//! pieces live next to them.
//!
//! # Architecture
//!
//! Workload trees use composite `{workload_id}/{relative_path}` keys so a
//! prefix scan yields one workload. A workload exists when its descriptor
//! (`workload.config.json`) is present; [`DescriptorConfigStore`] gives typed
//! access to it. Archives are tar.zst, see [`archive`].

pub mod archive;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hooks;
pub mod shared;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;
pub mod validation;
pub mod workspace;

pub use archive::{ExportOptions, Rewrite};
pub use config::GridConfig;
pub use descriptor::DescriptorConfigStore;
pub use error::{GridError, GridResult, StateError, StateResult};
pub use hooks::{
    HookRunner, ImportDecision, NoopHooks, StageChange, StageChangeDecision, StageChangeRequest,
};
pub use shared::MemorySharedStore;
pub use store::StateStore;
pub use traits::{
    ArchiveStore, ConfigStore, ContentStore, NoopRuntime, SharedStore, WorkloadRuntime,
    WorkspaceService,
};
pub use types::*;
pub use workspace::{MemoryWorkspaces, Workspace};
