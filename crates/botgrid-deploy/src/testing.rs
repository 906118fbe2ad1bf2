//! Shared fixtures for this crate's tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use botgrid_cluster::LocalDispatcher;
use botgrid_health::HealthRegistry;
use botgrid_lifecycle::{LifecycleHandle, LifecycleManager, WorkloadRegistry};
use botgrid_state::{
    ArchiveStore, Collaborator, ConfigStore, ContentStore, DEFAULT_WORKSPACE,
    DescriptorConfigStore, HookRunner, ImportDecision, MemoryWorkspaces, NoopRuntime, Stage,
    StageAction, StageChange, StageChangeDecision, StageChangeRequest, StateStore,
    WorkloadConfig, Workspace, WorkspaceService,
};

use crate::context::DeployContext;

/// What the stage-change hook saw.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub workload: WorkloadConfig,
    pub collaborators: Vec<Collaborator>,
    pub default_actions: Vec<String>,
}

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
    deny_import: AtomicBool,
    decision: Mutex<Option<StageChangeDecision>>,
    pub requests: Mutex<Vec<SeenRequest>>,
    pub changes: Mutex<Vec<(String, String)>>,
}

impl RecordingHooks {
    fn record(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    pub fn deny_imports(&self) {
        self.deny_import.store(true, Ordering::SeqCst);
    }

    pub fn decide(&self, decision: StageChangeDecision) {
        *self.decision.lock().unwrap() = Some(decision);
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn after_mount(&self, _workload_id: &str) -> anyhow::Result<()> {
        self.record("after_mount");
        Ok(())
    }

    async fn after_unmount(&self, _workload_id: &str) -> anyhow::Result<()> {
        self.record("after_unmount");
        Ok(())
    }

    async fn before_import(
        &self,
        _workload_id: &str,
        staging_dir: &Path,
    ) -> anyhow::Result<ImportDecision> {
        self.record("before_import");
        assert!(staging_dir.is_dir());
        if self.deny_import.load(Ordering::SeqCst) {
            Ok(ImportDecision::deny())
        } else {
            Ok(ImportDecision::allow())
        }
    }

    async fn on_stage_change_request(
        &self,
        request: &StageChangeRequest<'_>,
    ) -> anyhow::Result<StageChangeDecision> {
        self.record("on_stage_change_request");
        self.requests.lock().unwrap().push(SeenRequest {
            workload: request.workload.clone(),
            collaborators: request.collaborators.to_vec(),
            default_actions: request.default_actions.to_vec(),
        });
        let decision = self.decision.lock().unwrap().clone();
        Ok(decision.unwrap_or_else(|| {
            StageChangeDecision::with_actions(request.default_actions.iter().cloned())
        }))
    }

    async fn after_stage_changed(&self, change: &StageChange<'_>) -> anyhow::Result<()> {
        self.record("after_stage_changed");
        self.changes.lock().unwrap().push((
            change.before.pipeline_status.current_stage.id.clone(),
            change.after.pipeline_status.current_stage.id.clone(),
        ));
        Ok(())
    }
}

pub struct Harness {
    pub store: StateStore,
    pub configs: DescriptorConfigStore,
    pub workspaces: Arc<MemoryWorkspaces>,
    pub hooks: Arc<RecordingHooks>,
    pub ctx: DeployContext,
    pub workspace_id: String,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    pub async fn with_pipeline(stages: &[(&str, StageAction)]) -> Self {
        let stages = stages
            .iter()
            .map(|(id, action)| Stage {
                id: id.to_string(),
                label: id.to_string(),
                action: *action,
            })
            .collect();
        Self::build(Some(stages)).await
    }

    async fn build(pipeline: Option<Vec<Stage>>) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let content: Arc<dyn ContentStore> = Arc::new(store.clone());
        let configs = DescriptorConfigStore::new(content.clone());
        let workspaces = Arc::new(MemoryWorkspaces::new());
        let workspace_id = match pipeline {
            Some(stages) => {
                workspaces
                    .upsert(
                        Workspace::new("team")
                            .with_pipeline(stages)
                            .with_collaborator(Collaborator {
                                email: "alice@example.com".into(),
                                strategy: "local".into(),
                                role: Some("admin".into()),
                            }),
                    )
                    .await;
                "team".to_string()
            }
            None => DEFAULT_WORKSPACE.to_string(),
        };
        let hooks = Arc::new(RecordingHooks::default());
        let config_store: Arc<dyn ConfigStore> = Arc::new(configs.clone());
        let registry = Arc::new(WorkloadRegistry::new(content.clone(), config_store.clone()));
        let manager = Arc::new(LifecycleManager::new(
            "node-1",
            registry,
            content.clone(),
            config_store.clone(),
            Arc::new(NoopRuntime),
            hooks.clone(),
            HealthRegistry::new(),
        ));
        let archives: Arc<dyn ArchiveStore> = Arc::new(store.clone());
        let ctx = DeployContext {
            content,
            configs: config_store,
            archives,
            workspaces: workspaces.clone(),
            hooks: hooks.clone(),
            lifecycle: LifecycleHandle::new(manager, &LocalDispatcher),
        };
        Self {
            store,
            configs,
            workspaces,
            hooks,
            ctx,
            workspace_id,
        }
    }

    pub async fn register(&self, id: &str) {
        self.configs
            .set(id, &WorkloadConfig::new(id, "en", &["en"]))
            .await
            .unwrap();
        self.workspaces
            .add_workload_ref(id, &self.workspace_id)
            .await
            .unwrap();
    }

    pub async fn register_at_stage(&self, id: &str, stage: &str) {
        self.register(id).await;
        self.set_stage(id, stage).await;
    }

    pub async fn set_stage(&self, id: &str, stage: &str) {
        let mut config = self.configs.get(id).await.unwrap();
        config.pipeline_status.current_stage.id = stage.to_string();
        self.configs.set(id, &config).await.unwrap();
    }
}
