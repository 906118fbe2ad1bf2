//! Workload create, update and delete.

use std::sync::Arc;

use botgrid_state::validation::{ensure_languages, ensure_valid_workload_id, prefixed_workload_id};
use botgrid_state::{CurrentStage, GridError, GridResult, WorkloadConfig};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::context::DeployContext;
use crate::revision::RevisionManager;

/// Editable subset of a workload's configuration. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkloadUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub details: Option<Map<String, Value>>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default, rename = "defaultLanguage")]
    pub default_language: Option<String>,
    #[serde(default)]
    pub languages: Option<Vec<String>>,
    #[serde(default)]
    pub locked: Option<bool>,
}

impl WorkloadUpdate {
    fn validate(&self) -> GridResult<()> {
        if matches!(&self.languages, Some(langs) if langs.is_empty()) {
            return Err(GridError::validation("a workload needs at least one language"));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(GridError::validation("workload name cannot be empty"));
        }
        Ok(())
    }

    fn apply_to(self, config: &mut WorkloadConfig) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(description) = self.description {
            config.description = Some(description);
        }
        if let Some(category) = self.category {
            config.category = Some(category);
        }
        if let Some(details) = self.details {
            config.details = details;
        }
        if let Some(disabled) = self.disabled {
            config.disabled = disabled;
        }
        if let Some(private) = self.private {
            config.private = private;
        }
        if let Some(lang) = self.default_language {
            config.default_language = lang;
        }
        if let Some(languages) = self.languages {
            config.languages = languages;
        }
        if let Some(locked) = self.locked {
            config.locked = locked;
        }
    }
}

pub struct WorkloadManager {
    ctx: DeployContext,
    revisions: Arc<RevisionManager>,
}

impl WorkloadManager {
    pub fn new(ctx: DeployContext, revisions: Arc<RevisionManager>) -> Self {
        Self { ctx, revisions }
    }

    /// Scope `id` to the workspace's workload prefix, when it has one.
    pub async fn make_workload_id(&self, id: &str, workspace_id: &str) -> GridResult<String> {
        let prefix = self.ctx.workspaces.workload_prefix(workspace_id).await?;
        Ok(prefixed_workload_id(id, prefix.as_deref()))
    }

    /// Register a new workload in `workspace_id` and mount it unless it is
    /// disabled. Returns the stored configuration.
    pub async fn create(
        &self,
        mut config: WorkloadConfig,
        workspace_id: &str,
    ) -> GridResult<WorkloadConfig> {
        ensure_valid_workload_id(&config.id)?;
        if config.languages.is_empty() {
            return Err(GridError::validation("a workload needs at least one language"));
        }
        if config.default_language.is_empty() {
            config.disabled = true;
        } else {
            ensure_languages(&config)?;
        }
        if self.ctx.exists(&config.id).await? {
            return Err(GridError::Conflict(format!(
                "workload \"{}\" already exists",
                config.id
            )));
        }
        if config.name.is_empty() {
            config.name = config.id.clone();
        }

        if let Some(first) = self
            .ctx
            .workspaces
            .pipeline(workspace_id)
            .await?
            .as_ref()
            .and_then(|stages| stages.first())
        {
            config.pipeline_status.current_stage = CurrentStage {
                id: first.id.clone(),
                promoted_by: "system".to_string(),
                promoted_on: Utc::now(),
            };
        }

        let id = config.id.clone();
        self.ctx.configs.set(&id, &config).await?;
        self.ctx.workspaces.add_workload_ref(&id, workspace_id).await?;
        self.ctx.invalidate_ids();
        info!(workload_id = %id, %workspace_id, disabled = config.disabled, "workload created");

        if !config.disabled {
            self.ctx.lifecycle.mount(&id).await?;
        }
        Ok(config)
    }

    /// Apply an update to the editable fields of a workload.
    pub async fn update(
        &self,
        workload_id: &str,
        mut update: WorkloadUpdate,
    ) -> GridResult<WorkloadConfig> {
        update.validate()?;
        self.ctx.ensure_exists(workload_id).await?;

        let actual = self.ctx.config(workload_id).await?;
        // A language change needs the workload mounted.
        if update
            .default_language
            .as_ref()
            .is_some_and(|lang| *lang != actual.default_language)
        {
            update.disabled = Some(false);
        }
        let mut config = actual.clone();
        update.apply_to(&mut config);
        ensure_languages(&config)?;

        self.ctx.configs.set(workload_id, &config).await?;
        debug!(%workload_id, "workload configuration updated");

        if !config.disabled {
            if self.ctx.lifecycle.manager().is_mounted(workload_id) {
                self.ctx.lifecycle.unmount(workload_id).await?;
            }
            self.ctx.lifecycle.mount(workload_id).await?;
        } else if !actual.disabled {
            self.ctx.lifecycle.unmount(workload_id).await?;
        }
        Ok(config)
    }

    /// Unmount the workload everywhere and remove it with all its revisions.
    pub async fn delete(&self, workload_id: &str) -> GridResult<()> {
        self.ctx.ensure_exists(workload_id).await?;
        self.ctx.lifecycle.unmount(workload_id).await?;
        let revisions = self.revisions.prune(workload_id, true).await?;
        let files = self.ctx.content.delete_tree(workload_id).await?;
        self.ctx.workspaces.remove_workload_ref(workload_id).await?;
        self.ctx.invalidate_ids();
        info!(%workload_id, files, revisions, "workload deleted");
        Ok(())
    }
}
