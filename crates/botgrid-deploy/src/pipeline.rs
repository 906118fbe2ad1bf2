//! Promotion pipeline — stage requests, approvals and promotion.
//!
//! A request proposes the next stage of the workload's workspace pipeline.
//! Every request or approval gives the `on_stage_change_request` hook a
//! chance to decide what happens: it returns the actions to run (by
//! default the current stage's own action) and optionally a new identity
//! for the promoted workload. An empty action list leaves the request
//! pending.

use std::sync::Arc;

use botgrid_state::validation::ensure_valid_workload_id;
use botgrid_state::{
    CurrentStage, GridError, GridResult, Stage, StageAction, StageChange,
    StageChangeDecision, StageChangeRequest, StageRequest, WorkloadConfig,
};
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::context::DeployContext;
use crate::revision::RevisionManager;
use crate::transfer::TransferManager;
use crate::workloads::WorkloadManager;

pub struct PromotionPipeline {
    ctx: DeployContext,
    transfer: Arc<TransferManager>,
    revisions: Arc<RevisionManager>,
    workloads: Arc<WorkloadManager>,
    auto_revision: bool,
}

impl PromotionPipeline {
    pub fn new(
        ctx: DeployContext,
        transfer: Arc<TransferManager>,
        revisions: Arc<RevisionManager>,
        workloads: Arc<WorkloadManager>,
        auto_revision: bool,
    ) -> Self {
        Self {
            ctx,
            transfer,
            revisions,
            workloads,
            auto_revision,
        }
    }

    async fn find(&self, workload_id: &str) -> GridResult<WorkloadConfig> {
        self.ctx
            .lifecycle
            .manager()
            .registry()
            .find(workload_id)
            .await?
            .ok_or_else(|| GridError::not_found(format!("workload \"{workload_id}\" doesn't exist")))
    }

    /// Ask for the workload to move to the next stage of its pipeline.
    /// Does nothing without a pipeline or at the last stage.
    pub async fn request_stage_change(
        &self,
        workload_id: &str,
        requested_by: &str,
    ) -> GridResult<()> {
        let config = self.find(workload_id).await?;
        let Some(pipeline) = self.ctx.active_pipeline(workload_id).await? else {
            return Ok(());
        };

        let next = pipeline
            .iter()
            .position(|s| s.id == config.pipeline_status.current_stage.id)
            .map_or(0, |i| i + 1);
        let Some(stage) = pipeline.get(next) else {
            debug!(%workload_id, "end of pipeline");
            return Ok(());
        };

        let mut requested = config.clone();
        requested.pipeline_status.stage_request =
            Some(StageRequest::pending(&stage.id, requested_by));
        self.ctx.configs.set(workload_id, &requested).await?;
        info!(%workload_id, stage = %stage.id, %requested_by, "stage change requested");

        self.execute_stage_change(&config, requested, &pipeline).await
    }

    /// Approve the pending stage request. Approving twice with the same
    /// email and strategy counts once.
    pub async fn approve_stage_change(
        &self,
        workload_id: &str,
        email: &str,
        strategy: &str,
    ) -> GridResult<()> {
        let config = self.find(workload_id).await?;
        if config.pipeline_status.stage_request.is_none() {
            return Err(GridError::validation(format!(
                "workload \"{workload_id}\" does not have a stage request"
            )));
        }
        let Some(pipeline) = self.ctx.active_pipeline(workload_id).await? else {
            return Ok(());
        };

        let mut approved = config.clone();
        if let Some(request) = approved.pipeline_status.stage_request.as_mut() {
            if !request.approve(email, strategy) {
                debug!(%workload_id, %email, %strategy, "approval already recorded");
            }
        }
        self.ctx.configs.set(workload_id, &approved).await?;

        self.execute_stage_change(&config, approved, &pipeline).await
    }

    async fn execute_stage_change(
        &self,
        before: &WorkloadConfig,
        current: WorkloadConfig,
        pipeline: &[Stage],
    ) -> GridResult<()> {
        let workspace_id = self.ctx.workspaces.workspace_of(&current.id).await?;
        let collaborators = self.ctx.workspaces.collaborators(&workspace_id).await?;

        let current_stage = &current.pipeline_status.current_stage.id;
        let default_actions: Vec<String> = match pipeline.iter().find(|s| s.id == *current_stage) {
            Some(stage) => vec![stage.action.as_str().to_string()],
            None => {
                warn!(workload_id = %current.id, stage = %current_stage, "current stage is not part of the pipeline");
                Vec::new()
            }
        };

        let request = StageChangeRequest {
            workload: &current,
            collaborators: &collaborators,
            pipeline,
            default_actions: &default_actions,
        };
        let decision = match self.ctx.hooks.on_stage_change_request(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(workload_id = %current.id, error = %e, "stage change hook failed, nothing promoted");
                StageChangeDecision::blocked()
            }
        };

        let mut altered = current.clone();
        if let Some(target) = decision.target_id {
            ensure_valid_workload_id(&target)?;
            altered.id = target;
        }

        for action in &decision.actions {
            if self.auto_revision && self.ctx.exists(&altered.id).await? {
                self.snapshot(&altered.id).await;
            }
            match StageAction::parse(action) {
                Some(StageAction::PromoteCopy) => {
                    if let Err(e) = self.promote_copy(&current, &mut altered).await {
                        error!(workload_id = %current.id, error = %e, "error trying to promote_copy workload");
                    }
                }
                Some(StageAction::PromoteMove) => self.promote_move(&current, &mut altered).await?,
                None => debug!(workload_id = %current.id, %action, "ignoring unknown promotion action"),
            }
        }

        if altered.pipeline_status.current_stage.id != current.pipeline_status.current_stage.id {
            let change = StageChange {
                before,
                after: &altered,
                collaborators: &collaborators,
                pipeline,
            };
            if let Err(e) = self.ctx.hooks.after_stage_changed(&change).await {
                warn!(workload_id = %altered.id, error = %e, "after_stage_changed hook failed");
            }
            info!(
                workload_id = %altered.id,
                from = %current.pipeline_status.current_stage.id,
                to = %altered.pipeline_status.current_stage.id,
                "stage changed"
            );
            if self.auto_revision {
                self.snapshot(&altered.id).await;
            }
        }
        Ok(())
    }

    async fn snapshot(&self, workload_id: &str) {
        if let Err(e) = self.revisions.create(workload_id).await {
            warn!(%workload_id, error = %e, "automatic revision failed");
        }
    }

    /// Move the workload itself into the requested stage, renaming it when
    /// the hook picked a different identity.
    async fn promote_move(
        &self,
        initial: &WorkloadConfig,
        moved: &mut WorkloadConfig,
    ) -> GridResult<()> {
        if !enter_requested_stage(moved) {
            return Ok(());
        }
        if initial.id == moved.id {
            self.ctx.configs.set(&moved.id, moved).await?;
            return Ok(());
        }

        self.ctx.configs.set(&initial.id, moved).await?;
        self.transfer.duplicate(&initial.id, &moved.id).await?;
        self.ctx.lifecycle.mount(&moved.id).await?;
        self.workloads.delete(&initial.id).await?;
        Ok(())
    }

    /// Promote a copy of the workload, leaving the original in place with
    /// its request cleared.
    async fn promote_copy(
        &self,
        initial: &WorkloadConfig,
        copy: &mut WorkloadConfig,
    ) -> GridResult<()> {
        if initial.id == copy.id {
            let suffix = rand::thread_rng().gen_range(0..=100);
            copy.id = format!("{}__{}__{suffix}", copy.id, Utc::now().format("%y-%m-%d"));
        }
        if !enter_requested_stage(copy) {
            return Ok(());
        }

        self.transfer.duplicate(&initial.id, &copy.id).await?;
        self.ctx.configs.set(&copy.id, copy).await?;
        self.ctx.lifecycle.mount(&copy.id).await?;

        let mut original = initial.clone();
        original.pipeline_status.stage_request = None;
        self.ctx.configs.set(&original.id, &original).await?;
        info!(source = %initial.id, copy = %copy.id, "workload promoted as a copy");
        Ok(())
    }
}

/// Turn the pending request into the current stage. False when there is
/// no request left to fulfil.
fn enter_requested_stage(config: &mut WorkloadConfig) -> bool {
    let Some(request) = config.pipeline_status.stage_request.take() else {
        return false;
    };
    config.pipeline_status.current_stage = CurrentStage {
        id: request.id,
        promoted_by: request.requested_by,
        promoted_on: Utc::now(),
    };
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::REVISIONS_NAMESPACE;
    use crate::testing::Harness;
    use botgrid_state::{ArchiveStore, Approval, RequestStatus, WorkspaceService};

    fn pipeline(h: &Harness, auto_revision: bool) -> PromotionPipeline {
        let revisions = Arc::new(RevisionManager::new(h.ctx.clone(), 10));
        let transfer = Arc::new(TransferManager::new(h.ctx.clone()));
        let workloads = Arc::new(WorkloadManager::new(h.ctx.clone(), revisions.clone()));
        PromotionPipeline::new(h.ctx.clone(), transfer, revisions, workloads, auto_revision)
    }

    async fn two_stages(first: StageAction) -> Harness {
        let h = Harness::with_pipeline(&[("dev", first), ("prod", StageAction::PromoteCopy)]).await;
        h.register_at_stage("wa1", "dev").await;
        h
    }

    #[tokio::test]
    async fn approvals_are_deduplicated() {
        let h = two_stages(StageAction::PromoteMove).await;
        h.hooks.decide(StageChangeDecision::blocked());
        let p = pipeline(&h, false);

        p.request_stage_change("wa1", "alice").await.unwrap();
        p.approve_stage_change("wa1", "alice", "local").await.unwrap();
        p.approve_stage_change("wa1", "alice", "local").await.unwrap();

        let request = h.ctx.config("wa1").await.unwrap().pipeline_status.stage_request.unwrap();
        assert_eq!(request.id, "prod");
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.requested_by, "alice");
        assert_eq!(
            request.approvals,
            vec![Approval {
                email: "alice".into(),
                strategy: "local".into()
            }]
        );
        assert_eq!(h.hooks.count("on_stage_change_request"), 3);
    }

    #[tokio::test]
    async fn hook_sees_default_action_and_collaborators() {
        let h = two_stages(StageAction::PromoteMove).await;
        h.hooks.decide(StageChangeDecision::blocked());
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();

        let seen = h.hooks.requests.lock().unwrap()[0].clone();
        assert_eq!(seen.default_actions, vec!["promote_move"]);
        assert_eq!(seen.collaborators[0].email, "alice@example.com");
        assert_eq!(seen.workload.pipeline_status.stage_request.unwrap().id, "prod");
    }

    #[tokio::test]
    async fn approve_without_request_is_rejected() {
        let h = two_stages(StageAction::PromoteMove).await;
        let err = pipeline(&h, false)
            .approve_stage_change("wa1", "alice", "local")
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_workload_is_not_found() {
        let h = two_stages(StageAction::PromoteMove).await;
        assert!(matches!(
            pipeline(&h, false).request_stage_change("ghost", "alice").await,
            Err(GridError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn no_pipeline_and_last_stage_are_noops() {
        let h = Harness::new().await;
        h.register("wa1").await;
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();
        assert!(h.ctx.config("wa1").await.unwrap().pipeline_status.stage_request.is_none());
        assert_eq!(h.hooks.count("on_stage_change_request"), 0);

        let h = two_stages(StageAction::PromoteMove).await;
        h.set_stage("wa1", "prod").await;
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();
        assert!(h.ctx.config("wa1").await.unwrap().pipeline_status.stage_request.is_none());
        assert_eq!(h.hooks.count("on_stage_change_request"), 0);
    }

    #[tokio::test]
    async fn promote_move_in_place() {
        let h = two_stages(StageAction::PromoteMove).await;
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();

        let status = h.ctx.config("wa1").await.unwrap().pipeline_status;
        assert_eq!(status.current_stage.id, "prod");
        assert_eq!(status.current_stage.promoted_by, "alice");
        assert!(status.stage_request.is_none());
        assert_eq!(
            *h.hooks.changes.lock().unwrap(),
            vec![("dev".to_string(), "prod".to_string())]
        );
    }

    #[tokio::test]
    async fn promote_move_to_new_identity() {
        let h = two_stages(StageAction::PromoteMove).await;
        h.ctx.lifecycle.mount("wa1").await.unwrap();
        h.hooks.decide(StageChangeDecision {
            actions: vec!["promote_move".into()],
            target_id: Some("wa1-prod".into()),
        });
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();

        assert!(!h.ctx.exists("wa1").await.unwrap());
        let moved = h.ctx.config("wa1-prod").await.unwrap();
        assert_eq!(moved.id, "wa1-prod");
        assert_eq!(moved.pipeline_status.current_stage.id, "prod");
        assert!(h.ctx.lifecycle.manager().is_mounted("wa1-prod"));
        assert!(!h.ctx.lifecycle.manager().is_mounted("wa1"));
        assert_eq!(
            h.workspaces.workload_refs("team").await.unwrap(),
            vec!["wa1-prod"]
        );
    }

    #[tokio::test]
    async fn promote_copy_keeps_original() {
        let h = two_stages(StageAction::PromoteCopy).await;
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();

        let original = h.ctx.config("wa1").await.unwrap();
        assert_eq!(original.pipeline_status.current_stage.id, "dev");
        assert!(original.pipeline_status.stage_request.is_none());

        let refs = h.workspaces.workload_refs("team").await.unwrap();
        assert_eq!(refs.len(), 2);
        let copy_id = refs.iter().find(|id| *id != "wa1").unwrap();
        assert!(copy_id.starts_with("wa1__"));
        let copy = h.ctx.config(copy_id).await.unwrap();
        assert_eq!(copy.id, *copy_id);
        assert_eq!(copy.pipeline_status.current_stage.id, "prod");
        assert!(copy.pipeline_status.stage_request.is_none());
        assert!(h.ctx.lifecycle.manager().is_mounted(copy_id));
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let h = two_stages(StageAction::PromoteMove).await;
        h.hooks
            .decide(StageChangeDecision::with_actions(["deploy_to_mars"]));
        pipeline(&h, false).request_stage_change("wa1", "alice").await.unwrap();

        let status = h.ctx.config("wa1").await.unwrap().pipeline_status;
        assert_eq!(status.current_stage.id, "dev");
        assert!(status.stage_request.is_some());
        assert_eq!(h.hooks.count("after_stage_changed"), 0);
    }

    #[tokio::test]
    async fn invalid_target_id_is_rejected() {
        let h = two_stages(StageAction::PromoteMove).await;
        h.hooks.decide(StageChangeDecision {
            actions: vec!["promote_move".into()],
            target_id: Some("not valid!".into()),
        });
        let err = pipeline(&h, false)
            .request_stage_change("wa1", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::Validation(_)));
        assert_eq!(
            h.ctx.config("wa1").await.unwrap().pipeline_status.current_stage.id,
            "dev"
        );
    }

    #[tokio::test]
    async fn auto_revision_snapshots_before_and_after() {
        let h = two_stages(StageAction::PromoteMove).await;
        pipeline(&h, true).request_stage_change("wa1", "alice").await.unwrap();

        let revisions = h.store.list(REVISIONS_NAMESPACE).await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions.iter().any(|r| r.ends_with("§dev.tar.zst")));
        assert!(revisions.iter().any(|r| r.ends_with("§prod.tar.zst")));
    }
}
