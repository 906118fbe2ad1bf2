//! Hook extension points fired around lifecycle and promotion events.
//!
//! Hooks return a decision value instead of mutating their arguments; the
//! caller combines the decision with its own defaults.

use std::path::Path;

use async_trait::async_trait;

use crate::types::{Collaborator, Stage, WorkloadConfig};

/// Outcome of the `BeforeImport` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportDecision {
    pub allow_import: bool,
}

impl ImportDecision {
    pub fn allow() -> Self {
        Self { allow_import: true }
    }

    pub fn deny() -> Self {
        Self {
            allow_import: false,
        }
    }
}

/// Input of the `OnStageChangeRequest` hook.
#[derive(Debug, Clone)]
pub struct StageChangeRequest<'a> {
    /// Configuration as it would be persisted after the request.
    pub workload: &'a WorkloadConfig,
    pub collaborators: &'a [Collaborator],
    pub pipeline: &'a [Stage],
    /// Actions taken when the hook leaves the decision untouched.
    pub default_actions: &'a [String],
}

/// Outcome of the `OnStageChangeRequest` hook.
///
/// `actions` may be empty (block), contain the default action, or
/// `promote_copy` / `promote_move`. Unknown names are ignored by the
/// pipeline. `target_id` renames the promoted workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageChangeDecision {
    pub actions: Vec<String>,
    pub target_id: Option<String>,
}

impl StageChangeDecision {
    pub fn with_actions<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            target_id: None,
        }
    }

    pub fn blocked() -> Self {
        Self::default()
    }
}

/// Input of the `AfterStageChanged` hook.
#[derive(Debug, Clone)]
pub struct StageChange<'a> {
    pub before: &'a WorkloadConfig,
    pub after: &'a WorkloadConfig,
    pub collaborators: &'a [Collaborator],
    pub pipeline: &'a [Stage],
}

/// Executes user-provided hooks. Every method defaults to a no-op.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn after_mount(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_unmount(&self, _workload_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Veto point before an archive is imported. `staging_dir` holds the
    /// extracted archive.
    async fn before_import(
        &self,
        _workload_id: &str,
        _staging_dir: &Path,
    ) -> anyhow::Result<ImportDecision> {
        Ok(ImportDecision::allow())
    }

    async fn on_stage_change_request(
        &self,
        request: &StageChangeRequest<'_>,
    ) -> anyhow::Result<StageChangeDecision> {
        Ok(StageChangeDecision::with_actions(
            request.default_actions.iter().cloned(),
        ))
    }

    async fn after_stage_changed(&self, _change: &StageChange<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hook runner with no user code installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl HookRunner for NoopHooks {}
