//! Revision manager — timestamped snapshots of a workload and rollback.
//!
//! A revision is a tar.zst archive of the workload tree (model artifacts
//! excluded, they are rebuilt) stored in the global `revisions` archive
//! namespace under `{workload_id}§{unix_millis}[§{stage_id}].tar.zst`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use botgrid_state::{ExportOptions, GridError, GridResult, StateError, archive};
use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::context::DeployContext;

/// Archive namespace holding every revision.
pub const REVISIONS_NAMESPACE: &str = "revisions";

/// Separates the parts of a revision name. Not valid in workload ids.
pub const REVISION_SEPARATOR: char = '§';

const REVISION_EXTENSION: &str = ".tar.zst";

/// Tree prefixes left out of revisions.
const EXCLUDED_FROM_REVISIONS: &[&str] = &["models/"];

/// Parsed revision file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionName {
    pub workload_id: String,
    pub timestamp_millis: i64,
    pub stage_id: Option<String>,
}

impl RevisionName {
    pub fn new(workload_id: &str, timestamp_millis: i64, stage_id: Option<&str>) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            timestamp_millis,
            stage_id: stage_id.map(str::to_string),
        }
    }

    /// Parse a revision name, with or without its extension.
    pub fn parse(name: &str) -> GridResult<Self> {
        let base = name.strip_suffix(REVISION_EXTENSION).unwrap_or(name);
        let mut parts = base.splitn(3, REVISION_SEPARATOR);
        let (Some(workload_id), Some(timestamp)) = (parts.next(), parts.next()) else {
            return Err(GridError::validation(format!("invalid revision \"{name}\"")));
        };
        let timestamp_millis = timestamp
            .parse::<i64>()
            .map_err(|_| GridError::validation(format!("invalid revision timestamp in \"{name}\"")))?;
        Ok(Self {
            workload_id: workload_id.to_string(),
            timestamp_millis,
            stage_id: parts.next().map(str::to_string),
        })
    }

    /// Name under which the archive is stored.
    pub fn file_name(&self) -> String {
        format!("{self}{REVISION_EXTENSION}")
    }
}

impl fmt::Display for RevisionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{REVISION_SEPARATOR}{}",
            self.workload_id, self.timestamp_millis
        )?;
        if let Some(stage) = &self.stage_id {
            write!(f, "{REVISION_SEPARATOR}{stage}")?;
        }
        Ok(())
    }
}

pub struct RevisionManager {
    ctx: DeployContext,
    max_revisions: usize,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RevisionManager {
    pub fn new(ctx: DeployContext, max_revisions: usize) -> Self {
        Self {
            ctx,
            max_revisions,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_revisions(&self) -> usize {
        self.max_revisions
    }

    fn lock_for(&self, workload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(workload_id.to_string()).or_default().clone()
    }

    /// Current stage id when the workload's workspace has a pipeline.
    async fn stage_filter(&self, workload_id: &str) -> GridResult<Option<String>> {
        if self.ctx.active_pipeline(workload_id).await?.is_none() {
            return Ok(None);
        }
        let config = self.ctx.config(workload_id).await?;
        Ok(Some(config.pipeline_status.current_stage.id))
    }

    /// Revision file names of a workload for its current stage, oldest first.
    pub async fn list(&self, workload_id: &str) -> GridResult<Vec<String>> {
        self.ctx.ensure_exists(workload_id).await?;
        let stage = self.stage_filter(workload_id).await?;
        self.list_for(workload_id, stage.as_deref()).await
    }

    async fn list_for(&self, workload_id: &str, stage: Option<&str>) -> GridResult<Vec<String>> {
        let mut revisions: Vec<(i64, String)> = self
            .ctx
            .archives
            .list(REVISIONS_NAMESPACE)
            .await?
            .into_iter()
            .filter_map(|file| {
                let parsed = RevisionName::parse(&file).ok()?;
                if parsed.workload_id != workload_id {
                    return None;
                }
                if stage.is_some() && parsed.stage_id.as_deref() != stage {
                    return None;
                }
                Some((parsed.timestamp_millis, file))
            })
            .collect();
        revisions.sort();
        Ok(revisions.into_iter().map(|(_, file)| file).collect())
    }

    /// Snapshot the workload and prune older revisions. Returns the name of
    /// the new revision.
    pub async fn create(&self, workload_id: &str) -> GridResult<String> {
        self.ctx.ensure_exists(workload_id).await?;
        let lock = self.lock_for(workload_id);
        let _guard = lock.lock().await;

        let stage = self.stage_filter(workload_id).await?;
        let existing = self.list_for(workload_id, stage.as_deref()).await?;
        // Names must sort after every existing revision, even within one millisecond.
        let newest = existing
            .last()
            .and_then(|file| RevisionName::parse(file).ok())
            .map(|rev| rev.timestamp_millis + 1)
            .unwrap_or(i64::MIN);
        let timestamp = Utc::now().timestamp_millis().max(newest);
        let name = RevisionName::new(workload_id, timestamp, stage.as_deref());

        let data = self
            .ctx
            .content
            .export_archive(workload_id, &ExportOptions::excluding(EXCLUDED_FROM_REVISIONS.iter().copied()))
            .await?;
        let file = name.file_name();
        self.ctx
            .archives
            .put(REVISIONS_NAMESPACE, &file, &data)
            .await?;
        info!(%workload_id, revision = %file, size = data.len(), "revision created");

        self.prune_locked(workload_id, stage.as_deref(), false).await?;
        Ok(file)
    }

    /// Delete revisions beyond the newest `max_revisions`, or all of them
    /// when `clean_all` is set. Returns how many were deleted.
    pub async fn prune(&self, workload_id: &str, clean_all: bool) -> GridResult<usize> {
        self.ctx.ensure_exists(workload_id).await?;
        let lock = self.lock_for(workload_id);
        let _guard = lock.lock().await;
        let stage = if clean_all {
            None
        } else {
            self.stage_filter(workload_id).await?
        };
        self.prune_locked(workload_id, stage.as_deref(), clean_all)
            .await
    }

    async fn prune_locked(
        &self,
        workload_id: &str,
        stage: Option<&str>,
        clean_all: bool,
    ) -> GridResult<usize> {
        let mut revisions = self.list_for(workload_id, stage).await?;
        revisions.reverse();
        let keep = if clean_all { 0 } else { self.max_revisions };
        let outdated = revisions.split_off(keep.min(revisions.len()));
        for file in &outdated {
            self.ctx.archives.delete(REVISIONS_NAMESPACE, file).await?;
        }
        if !outdated.is_empty() {
            debug!(%workload_id, pruned = outdated.len(), "revisions pruned");
        }
        Ok(outdated.len())
    }

    /// Restore a workload from one of its revisions.
    ///
    /// The workload is unmounted fleet-wide, its tree is swapped for the
    /// revision's in one store transaction, and it is mounted again.
    pub async fn rollback(&self, workload_id: &str, revision: &str) -> GridResult<()> {
        self.ctx.ensure_exists(workload_id).await?;
        let parsed = RevisionName::parse(revision)?;
        if parsed.workload_id != workload_id {
            return Err(GridError::validation(
                "cannot roll back a workload to a revision of a different workload",
            ));
        }
        if let Some(stage) = self.stage_filter(workload_id).await? {
            if parsed.stage_id.as_deref() != Some(stage.as_str()) {
                return Err(GridError::validation(
                    "cannot roll back a workload to a revision of a different stage",
                ));
            }
        }

        let data = self
            .ctx
            .archives
            .get(REVISIONS_NAMESPACE, &parsed.file_name())
            .await?
            .ok_or_else(|| GridError::not_found(format!("revision \"{revision}\"")))?;

        let staging = TempDir::new().map_err(StateError::from)?;
        archive::unpack_to_dir(data, staging.path()).await?;
        let files = archive::read_dir_files(staging.path()).await?;

        self.ctx.lifecycle.unmount(workload_id).await?;
        self.ctx.content.replace_tree(workload_id, files).await?;
        if !self.ctx.lifecycle.mount(workload_id).await? {
            warn!(%workload_id, revision = %parsed, "rollback applied, but the workload couldn't be mounted");
            return Ok(());
        }
        info!(%workload_id, revision = %parsed, "rollback successful");
        Ok(())
    }
}
