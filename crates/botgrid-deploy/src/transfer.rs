//! Import, export and duplication of workload trees.

use std::time::Instant;

use botgrid_state::validation::ensure_valid_workload_id;
use botgrid_state::{
    CurrentStage, DESCRIPTOR_FILE, ExportOptions, FileEntry, GridError, GridResult,
    HealthStatus, Rewrite, StateError, archive,
};
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::context::DeployContext;

/// Token standing in for `/workloads/{id}/` inside exported JSON files.
pub const PLACEHOLDER: &str = "/workloads/WORKLOAD_ID_PLACEHOLDER/";

/// Tree prefixes left out of exports.
const EXCLUDED_FROM_EXPORT: &[&str] = &["models/", "libraries/node_modules/"];

/// Result of an import that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The archive was imported; `mounted` is false when the workload is
    /// disabled or failed to mount.
    Imported { mounted: bool },
    /// A `BeforeImport` hook vetoed the import. Nothing was changed.
    Declined,
}

fn self_reference(workload_id: &str) -> String {
    format!("/workloads/{workload_id}/")
}

pub struct TransferManager {
    ctx: DeployContext,
}

impl TransferManager {
    pub fn new(ctx: DeployContext) -> Self {
        Self { ctx }
    }

    /// Package a workload as a portable archive.
    pub async fn export(&self, workload_id: &str) -> GridResult<Vec<u8>> {
        self.ctx.ensure_exists(workload_id).await?;
        let options = ExportOptions::excluding(EXCLUDED_FROM_EXPORT.iter().copied())
            .with_rewrite(Rewrite::new(self_reference(workload_id), PLACEHOLDER));
        let data = self.ctx.content.export_archive(workload_id, &options).await?;
        info!(%workload_id, size = data.len(), "workload exported");
        Ok(data)
    }

    /// Import an archive as `workload_id` into `workspace_id`.
    pub async fn import(
        &self,
        workload_id: &str,
        bundle: Vec<u8>,
        workspace_id: &str,
        allow_overwrite: bool,
    ) -> GridResult<ImportOutcome> {
        let started = Instant::now();
        ensure_valid_workload_id(workload_id)?;

        let existed = self.ctx.exists(workload_id).await?;
        if existed {
            if !allow_overwrite {
                return Err(GridError::Conflict(format!(
                    "cannot import workload \"{workload_id}\": it already exists and overwriting is not allowed"
                )));
            }
            warn!(%workload_id, "workload already exists, files in the archive will replace existing ones");
        }

        let result = self
            .import_staged(workload_id, bundle, workspace_id, existed)
            .await;
        self.ctx.invalidate_ids();
        debug!(
            %workload_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "import finished"
        );
        result
    }

    async fn import_staged(
        &self,
        workload_id: &str,
        bundle: Vec<u8>,
        workspace_id: &str,
        existed: bool,
    ) -> GridResult<ImportOutcome> {
        let staging = TempDir::new().map_err(StateError::from)?;
        archive::unpack_to_dir(bundle, staging.path()).await?;

        let decision = self
            .ctx
            .hooks
            .before_import(workload_id, staging.path())
            .await?;
        if !decision.allow_import {
            info!(%workload_id, "import declined by hook");
            return Ok(ImportOutcome::Declined);
        }

        let mut files = archive::read_dir_files(staging.path()).await?;
        Rewrite::new(PLACEHOLDER, self_reference(workload_id)).apply_to_json(&mut files);
        let files = workload_root(files)?;

        if existed {
            let incoming: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            let stale = self
                .ctx
                .content
                .list_files(workload_id)
                .await?
                .into_iter()
                .filter(|path| !incoming.contains(&path.as_str()))
                .count();
            debug!(%workload_id, stale, "files absent from the archive will be removed");
            self.ctx.lifecycle.unmount(workload_id).await?;
        }

        self.ctx.content.replace_tree(workload_id, files).await?;

        let original = self.ctx.config(workload_id).await?;
        let name = if original.name == workload_id {
            original.name.clone()
        } else {
            format!("{} ({workload_id})", original.name)
        };
        let mut patch = json!({ "id": workload_id, "name": name });
        let pipeline = self.ctx.workspaces.pipeline(workspace_id).await?;
        if let Some(first) = pipeline.as_ref().and_then(|stages| stages.first()) {
            let stage = CurrentStage {
                id: first.id.clone(),
                promoted_by: "system".to_string(),
                promoted_on: Utc::now(),
            };
            patch["pipeline_status"] = json!({ "current_stage": stage });
        }
        let config = self.ctx.configs.merge(workload_id, patch).await?;
        self.ctx
            .workspaces
            .add_workload_ref(workload_id, workspace_id)
            .await?;

        if config.disabled {
            self.ctx
                .lifecycle
                .manager()
                .health()
                .set_status(workload_id, HealthStatus::Disabled);
            info!(%workload_id, "workload imported (disabled)");
            return Ok(ImportOutcome::Imported { mounted: false });
        }

        if !self.ctx.lifecycle.mount(workload_id).await? {
            warn!(%workload_id, "import completed, but the workload couldn't be mounted");
            return Ok(ImportOutcome::Imported { mounted: false });
        }
        info!(%workload_id, "workload imported");
        Ok(ImportOutcome::Imported { mounted: true })
    }

    /// Copy every file of `source_id` to `dest_id` byte for byte and
    /// register the copy in the source's workspace.
    pub async fn duplicate(&self, source_id: &str, dest_id: &str) -> GridResult<()> {
        if !self.ctx.exists(source_id).await? {
            return Err(GridError::not_found(format!(
                "source workload \"{source_id}\" doesn't exist"
            )));
        }
        if source_id == dest_id {
            return Err(GridError::validation(
                "the new workload id needs to differ from the original",
            ));
        }

        let files = self.ctx.content.read_tree(source_id).await?;
        let count = files.len();
        for file in files {
            self.ctx
                .content
                .write_file(dest_id, &file.path, &file.content)
                .await?;
        }
        let workspace_id = self.ctx.workspaces.workspace_of(source_id).await?;
        self.ctx
            .workspaces
            .add_workload_ref(dest_id, &workspace_id)
            .await?;
        self.ctx.invalidate_ids();
        info!(%source_id, %dest_id, files = count, "workload duplicated");
        Ok(())
    }
}

/// Keep the tree under the archive's single descriptor, re-rooted there.
fn workload_root(files: Vec<FileEntry>) -> GridResult<Vec<FileEntry>> {
    let descriptors: Vec<&str> = files
        .iter()
        .filter(|f| f.path == DESCRIPTOR_FILE || f.path.ends_with(&format!("/{DESCRIPTOR_FILE}")))
        .map(|f| f.path.as_str())
        .collect();
    let root = match descriptors.as_slice() {
        [single] => single[..single.len() - DESCRIPTOR_FILE.len()].to_string(),
        [] => {
            return Err(GridError::validation(
                "archive does not contain a workload descriptor",
            ));
        }
        _ => {
            return Err(GridError::validation(
                "archive contains more than one workload descriptor",
            ));
        }
    };
    Ok(files
        .into_iter()
        .filter_map(|FileEntry { path, content }| {
            path.strip_prefix(&root)
                .map(|rest| FileEntry::new(rest, content))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use botgrid_state::{ContentStore, StageAction, WorkloadConfig, WorkspaceService};

    async fn tree(h: &Harness, id: &str) -> Vec<FileEntry> {
        h.store.read_tree(id).await.unwrap()
    }

    async fn seed_a(h: &Harness) {
        h.register("wa1").await;
        h.store
            .write_file("wa1", "flows/main.flow.json", br#"{"media":"/workloads/wa1/media/x.png"}"#)
            .await
            .unwrap();
        h.store
            .write_file("wa1", "media/readme.txt", b"/workloads/wa1/ stays in text")
            .await
            .unwrap();
        h.store.write_file("wa1", "models/en.model", b"w").await.unwrap();
        h.store
            .write_file("wa1", "libraries/node_modules/x/i.js", b"1")
            .await
            .unwrap();
    }

    #[test]
    fn workload_root_requires_one_descriptor() {
        let none = vec![FileEntry::new("a.json", "{}")];
        assert!(matches!(workload_root(none), Err(GridError::Validation(_))));

        let two = vec![
            FileEntry::new("a/workload.config.json", "{}"),
            FileEntry::new("b/workload.config.json", "{}"),
        ];
        assert!(matches!(workload_root(two), Err(GridError::Validation(_))));

        let nested = vec![
            FileEntry::new("bundle/workload.config.json", "{}"),
            FileEntry::new("bundle/flows/a.json", "[]"),
            FileEntry::new("stray.txt", "x"),
        ];
        let rooted = workload_root(nested).unwrap();
        let paths: Vec<_> = rooted.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["workload.config.json", "flows/a.json"]);
    }

    #[tokio::test]
    async fn export_excludes_caches_and_rewrites_self_references() {
        let h = Harness::new().await;
        seed_a(&h).await;
        let transfer = TransferManager::new(h.ctx.clone());

        let files = archive::unpack(transfer.export("wa1").await.unwrap())
            .await
            .unwrap();
        assert!(files.iter().all(|f| !f.path.starts_with("models/")));
        assert!(files.iter().all(|f| !f.path.starts_with("libraries/node_modules/")));
        let flow = files.iter().find(|f| f.path == "flows/main.flow.json").unwrap();
        assert_eq!(
            std::str::from_utf8(&flow.content).unwrap(),
            r#"{"media":"/workloads/WORKLOAD_ID_PLACEHOLDER/media/x.png"}"#
        );
        let text = files.iter().find(|f| f.path == "media/readme.txt").unwrap();
        assert_eq!(text.content, b"/workloads/wa1/ stays in text".to_vec());
    }

    #[tokio::test]
    async fn export_import_round_trip_rewrites_to_new_id() {
        let h = Harness::new().await;
        seed_a(&h).await;
        let transfer = TransferManager::new(h.ctx.clone());
        let bundle = transfer.export("wa1").await.unwrap();

        let outcome = transfer
            .import("wb2", bundle, &h.workspace_id, false)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Imported { mounted: true });

        let source = tree(&h, "wa1").await;
        let imported = tree(&h, "wb2").await;
        for file in &imported {
            if file.path == DESCRIPTOR_FILE {
                continue;
            }
            let original = source.iter().find(|f| f.path == file.path).unwrap();
            let expected = String::from_utf8(original.content.clone()).unwrap();
            let expected = if file.path.ends_with(".json") {
                expected.replace("/workloads/wa1/", "/workloads/wb2/")
            } else {
                expected
            };
            assert_eq!(String::from_utf8(file.content.clone()).unwrap(), expected);
        }
        assert_eq!(imported.len(), source.len() - 2);

        let config = h.ctx.config("wb2").await.unwrap();
        assert_eq!(config.id, "wb2");
        assert_eq!(config.name, "wa1 (wb2)");
        assert!(h.ctx.lifecycle.manager().is_mounted("wb2"));
        assert_eq!(
            h.workspaces.workload_refs(&h.workspace_id).await.unwrap(),
            vec!["wa1", "wb2"]
        );
    }

    #[tokio::test]
    async fn import_over_existing_needs_overwrite() {
        let h = Harness::new().await;
        seed_a(&h).await;
        h.register("wb2").await;
        h.store.write_file("wb2", "old.json", b"{}").await.unwrap();
        let transfer = TransferManager::new(h.ctx.clone());
        let bundle = transfer.export("wa1").await.unwrap();

        let err = transfer
            .import("wb2", bundle.clone(), &h.workspace_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Conflict(_)));
        assert!(h.store.file_exists("wb2", "old.json").await.unwrap());

        h.ctx.lifecycle.mount("wb2").await.unwrap();
        transfer
            .import("wb2", bundle, &h.workspace_id, true)
            .await
            .unwrap();
        assert!(!h.store.file_exists("wb2", "old.json").await.unwrap());
        assert!(h.store.file_exists("wb2", "flows/main.flow.json").await.unwrap());
        assert_eq!(h.hooks.count("after_unmount"), 1);
    }

    #[tokio::test]
    async fn declined_import_changes_nothing() {
        let h = Harness::new().await;
        seed_a(&h).await;
        let transfer = TransferManager::new(h.ctx.clone());
        let bundle = transfer.export("wa1").await.unwrap();
        h.hooks.deny_imports();

        let outcome = transfer
            .import("wb2", bundle, &h.workspace_id, false)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Declined);
        assert!(!h.ctx.exists("wb2").await.unwrap());
    }

    #[tokio::test]
    async fn import_validates_id_and_descriptor() {
        let h = Harness::new().await;
        let transfer = TransferManager::new(h.ctx.clone());
        let bundle = archive::pack(vec![FileEntry::new("flows/a.json", "[]")])
            .await
            .unwrap();

        assert!(matches!(
            transfer.import("bad id", bundle.clone(), "default", false).await,
            Err(GridError::Validation(_))
        ));
        assert!(matches!(
            transfer.import("wb2", bundle, "default", false).await,
            Err(GridError::Validation(_))
        ));
        assert!(!h.ctx.exists("wb2").await.unwrap());
    }

    #[tokio::test]
    async fn disabled_import_is_not_mounted() {
        let h = Harness::new().await;
        let mut config = WorkloadConfig::new("wa1", "en", &["en"]);
        config.disabled = true;
        let bundle = archive::pack(vec![FileEntry::new(
            DESCRIPTOR_FILE,
            serde_json::to_vec(&config).unwrap(),
        )])
        .await
        .unwrap();
        let transfer = TransferManager::new(h.ctx.clone());

        let outcome = transfer.import("wa1", bundle, "default", false).await.unwrap();
        assert_eq!(outcome, ImportOutcome::Imported { mounted: false });
        assert!(!h.ctx.lifecycle.manager().is_mounted("wa1"));
        assert_eq!(
            h.ctx.lifecycle.manager().health().get("wa1").unwrap().status,
            HealthStatus::Disabled
        );
        assert_eq!(h.ctx.config("wa1").await.unwrap().name, "wa1");
    }

    #[tokio::test]
    async fn import_into_pipeline_starts_at_first_stage() {
        let h = Harness::with_pipeline(&[
            ("dev", StageAction::PromoteMove),
            ("prod", StageAction::PromoteCopy),
        ])
        .await;
        let bundle = archive::pack(vec![FileEntry::new(
            DESCRIPTOR_FILE,
            serde_json::to_vec(&WorkloadConfig::new("wa1", "en", &["en"])).unwrap(),
        )])
        .await
        .unwrap();
        let transfer = TransferManager::new(h.ctx.clone());
        transfer.import("wa1", bundle, "team", false).await.unwrap();

        let stage = h.ctx.config("wa1").await.unwrap().pipeline_status.current_stage;
        assert_eq!(stage.id, "dev");
        assert_eq!(stage.promoted_by, "system");
    }

    #[tokio::test]
    async fn duplicate_copies_bytes_and_workspace() {
        let h = Harness::new().await;
        seed_a(&h).await;
        let transfer = TransferManager::new(h.ctx.clone());
        transfer.duplicate("wa1", "wa1-copy").await.unwrap();

        assert_eq!(tree(&h, "wa1").await, tree(&h, "wa1-copy").await);
        assert_eq!(
            h.workspaces.workspace_of("wa1-copy").await.unwrap(),
            h.workspace_id
        );
    }

    #[tokio::test]
    async fn duplicate_guards() {
        let h = Harness::new().await;
        seed_a(&h).await;
        let transfer = TransferManager::new(h.ctx.clone());
        assert!(matches!(
            transfer.duplicate("ghost", "wa2").await,
            Err(GridError::NotFound(_))
        ));
        assert!(matches!(
            transfer.duplicate("wa1", "wa1").await,
            Err(GridError::Validation(_))
        ));
    }
}
