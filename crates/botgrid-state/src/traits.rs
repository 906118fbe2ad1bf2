//! Collaborator interfaces consumed by the lifecycle and deployment layers.
//!
//! Each trait is object safe so the facade can hold `Arc<dyn Trait>` and tests
//! can swap in in-memory implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::archive::{self, ExportOptions};
use crate::error::{StateError, StateResult};
use crate::types::{Collaborator, FileEntry, Stage, WorkloadConfig, WorkloadId, WorkspaceId};

/// Persistent, per-workload file tree.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Ids of every workload that has a file named `file_name` at its root.
    async fn list_workloads_with(&self, file_name: &str) -> StateResult<Vec<WorkloadId>>;

    /// Relative paths of all files of a workload, sorted.
    async fn list_files(&self, workload_id: &str) -> StateResult<Vec<String>>;

    async fn file_exists(&self, workload_id: &str, path: &str) -> StateResult<bool>;

    async fn read_file(&self, workload_id: &str, path: &str) -> StateResult<Option<Vec<u8>>>;

    async fn write_file(&self, workload_id: &str, path: &str, content: &[u8]) -> StateResult<()>;

    /// Returns true if the file existed.
    async fn delete_file(&self, workload_id: &str, path: &str) -> StateResult<bool>;

    /// Delete the whole tree of a workload. Returns the number of files removed.
    async fn delete_tree(&self, workload_id: &str) -> StateResult<u32>;

    /// Replace the whole tree of a workload with `files`.
    ///
    /// Readers observe either the previous tree or the new one, never a mix.
    async fn replace_tree(&self, workload_id: &str, files: Vec<FileEntry>) -> StateResult<()>;

    /// All files of a workload.
    async fn read_tree(&self, workload_id: &str) -> StateResult<Vec<FileEntry>> {
        let mut files = Vec::new();
        for path in self.list_files(workload_id).await? {
            if let Some(content) = self.read_file(workload_id, &path).await? {
                files.push(FileEntry::new(path, content));
            }
        }
        Ok(files)
    }

    /// Pack a workload tree into a tar.zst archive.
    async fn export_archive(
        &self,
        workload_id: &str,
        options: &ExportOptions,
    ) -> StateResult<Vec<u8>> {
        let files = self.read_tree(workload_id).await?;
        archive::pack(options.apply(files)).await
    }
}

/// Global blob storage for revision and export archives.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StateResult<()>;

    async fn get(&self, namespace: &str, name: &str) -> StateResult<Option<Vec<u8>>>;

    /// Names stored under `namespace`, sorted.
    async fn list(&self, namespace: &str) -> StateResult<Vec<String>>;

    /// Returns true if the archive existed.
    async fn delete(&self, namespace: &str, name: &str) -> StateResult<bool>;
}

/// Typed access to workload descriptors.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fails with [`StateError::NotFound`] when the workload has no descriptor.
    async fn get(&self, workload_id: &str) -> StateResult<WorkloadConfig>;

    async fn set(&self, workload_id: &str, config: &WorkloadConfig) -> StateResult<()>;

    /// Deep-merge a partial JSON document into the stored descriptor and
    /// persist the result.
    async fn merge(
        &self,
        workload_id: &str,
        partial: serde_json::Value,
    ) -> StateResult<WorkloadConfig>;

    async fn exists(&self, workload_id: &str) -> StateResult<bool> {
        match self.get(workload_id).await {
            Ok(_) => Ok(true),
            Err(StateError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Fleet-wide key/value store with per-key expiry.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()>;

    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Live keys matching `pattern`. A trailing `*` matches any suffix;
    /// otherwise the key must match exactly.
    async fn keys(&self, pattern: &str) -> StateResult<Vec<String>>;

    /// Values for `keys`, in order. Expired or missing keys yield `None`.
    async fn mget(&self, keys: &[String]) -> StateResult<Vec<Option<Vec<u8>>>>;
}

/// Workspace membership, pipelines and collaborators.
#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn pipeline(&self, workspace_id: &str) -> StateResult<Option<Vec<Stage>>>;

    /// A workspace has a pipeline when it defines more than one stage.
    async fn has_pipeline(&self, workspace_id: &str) -> StateResult<bool> {
        Ok(self
            .pipeline(workspace_id)
            .await?
            .is_some_and(|stages| stages.len() > 1))
    }

    /// Workspace referencing `workload_id`, or the default workspace.
    async fn workspace_of(&self, workload_id: &str) -> StateResult<WorkspaceId>;

    async fn workload_refs(&self, workspace_id: &str) -> StateResult<Vec<WorkloadId>>;

    async fn add_workload_ref(&self, workload_id: &str, workspace_id: &str) -> StateResult<()>;

    async fn remove_workload_ref(&self, workload_id: &str) -> StateResult<()>;

    async fn collaborators(&self, workspace_id: &str) -> StateResult<Vec<Collaborator>>;

    /// Prefix applied to ids of workloads created in `workspace_id`.
    async fn workload_prefix(&self, workspace_id: &str) -> StateResult<Option<String>>;
}

/// Per-process runtime subsystems a workload is loaded into.
///
/// Mount calls the `load_*` steps in order; unmount calls the
/// `clear`/`unload` steps in order.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    async fn load_messaging(&self, workload_id: &str) -> anyhow::Result<()>;
    async fn load_content(&self, workload_id: &str) -> anyhow::Result<()>;
    async fn load_modules(&self, workload_id: &str) -> anyhow::Result<()>;
    async fn clear_content(&self, workload_id: &str) -> anyhow::Result<()>;
    async fn unload_modules(&self, workload_id: &str) -> anyhow::Result<()>;
    async fn unload_messaging(&self, workload_id: &str) -> anyhow::Result<()>;
}

/// Runtime that accepts every load and unload.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRuntime;

#[async_trait]
impl WorkloadRuntime for NoopRuntime {
    async fn load_messaging(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn load_content(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn load_modules(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn clear_content(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn unload_modules(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
    async fn unload_messaging(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
