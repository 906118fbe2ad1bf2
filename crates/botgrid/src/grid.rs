//! Assembly of every BotGrid subsystem from a [`GridConfig`].

use std::sync::{Arc, Mutex};

use botgrid_cluster::{ClusterDispatcher, LocalDispatcher};
use botgrid_deploy::{
    DeployContext, PromotionPipeline, RevisionManager, TransferManager, WorkloadManager,
};
use botgrid_health::{HealthPublisher, HealthReader, HealthRegistry};
use botgrid_lifecycle::{LifecycleHandle, LifecycleManager, WorkloadRegistry};
use botgrid_state::{
    ArchiveStore, ConfigStore, ContentStore, DescriptorConfigStore, GridConfig, GridResult,
    HookRunner, MemorySharedStore, MemoryWorkspaces, NoopHooks, NoopRuntime, SharedStore,
    StateStore, WorkloadRuntime, WorkspaceService,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Collaborators a [`Grid`] is built from. Anything left unset gets a
/// single-process default.
pub struct GridBuilder {
    config: GridConfig,
    store: Option<StateStore>,
    shared: Option<Arc<dyn SharedStore>>,
    workspaces: Option<Arc<dyn WorkspaceService>>,
    runtime: Arc<dyn WorkloadRuntime>,
    hooks: Arc<dyn HookRunner>,
    dispatcher: Arc<dyn ClusterDispatcher>,
}

impl GridBuilder {
    fn new(config: GridConfig) -> Self {
        Self {
            config,
            store: None,
            shared: None,
            workspaces: None,
            runtime: Arc::new(NoopRuntime),
            hooks: Arc::new(NoopHooks),
            dispatcher: Arc::new(LocalDispatcher),
        }
    }

    /// Use an already opened store, e.g. one shared by several grids.
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shared_store(mut self, shared: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn workspaces(mut self, workspaces: Arc<dyn WorkspaceService>) -> Self {
        self.workspaces = Some(workspaces);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn WorkloadRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn HookRunner>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn ClusterDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn build(self) -> anyhow::Result<Grid> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => match &config.storage.path {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let store = StateStore::open(path)?;
                    info!(path = ?path, "state store opened");
                    store
                }
                None => StateStore::open_in_memory()?,
            },
        };
        let shared = self
            .shared
            .unwrap_or_else(|| Arc::new(MemorySharedStore::new()));
        let workspaces = self
            .workspaces
            .unwrap_or_else(|| Arc::new(MemoryWorkspaces::new()));

        let content: Arc<dyn ContentStore> = Arc::new(store.clone());
        let archives: Arc<dyn ArchiveStore> = Arc::new(store.clone());
        let configs: Arc<dyn ConfigStore> = Arc::new(DescriptorConfigStore::new(content.clone()));

        let server_id = config.server.id.clone();
        let health = HealthRegistry::new();
        let publisher = Arc::new(
            HealthPublisher::new(
                health.clone(),
                Some(shared.clone()),
                content.clone(),
                server_id.clone(),
                config.server.hostname(),
            )
            .with_timing(
                config.health.refresh_interval(),
                config.health.expiry(),
                config.health.publish_debounce(),
            ),
        );
        let reader = HealthReader::new(Some(shared.clone()), workspaces.clone(), publisher.clone());

        let registry = Arc::new(WorkloadRegistry::new(content.clone(), configs.clone()));
        let mut manager = LifecycleManager::new(
            server_id.clone(),
            registry,
            content.clone(),
            configs.clone(),
            self.runtime,
            self.hooks.clone(),
            health,
        )
        .with_publisher(publisher.clone())
        .with_session_timeout(config.dialog.session_timeout());
        if let Some(dir) = &config.storage.data_dir {
            manager = manager.with_data_dir(dir);
        }
        let lifecycle = LifecycleHandle::new(Arc::new(manager), self.dispatcher.as_ref());

        let ctx = DeployContext {
            content,
            configs,
            archives,
            workspaces: workspaces.clone(),
            hooks: self.hooks,
            lifecycle: lifecycle.clone(),
        };
        let revisions = Arc::new(RevisionManager::new(ctx.clone(), config.revisions.max));
        let transfer = Arc::new(TransferManager::new(ctx.clone()));
        let workloads = Arc::new(WorkloadManager::new(ctx.clone(), revisions.clone()));
        let pipeline = Arc::new(PromotionPipeline::new(
            ctx,
            transfer.clone(),
            revisions.clone(),
            workloads.clone(),
            config.revisions.auto_revision,
        ));

        let (shutdown, _) = watch::channel(false);
        info!(server_id = %server_id, primary = config.server.primary, "grid assembled");
        Ok(Grid {
            config,
            store,
            workspaces,
            publisher,
            reader,
            lifecycle,
            revisions,
            transfer,
            workloads,
            pipeline,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

/// One fleet process: its lifecycle manager, health publication and the
/// deployment managers, wired to shared stores.
pub struct Grid {
    config: GridConfig,
    store: StateStore,
    workspaces: Arc<dyn WorkspaceService>,
    publisher: Arc<HealthPublisher>,
    reader: HealthReader,
    lifecycle: LifecycleHandle,
    revisions: Arc<RevisionManager>,
    transfer: Arc<TransferManager>,
    workloads: Arc<WorkloadManager>,
    pipeline: Arc<PromotionPipeline>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Grid {
    pub fn builder(config: GridConfig) -> GridBuilder {
        GridBuilder::new(config)
    }

    /// A single-process grid with default collaborators.
    pub fn open(config: GridConfig) -> anyhow::Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn server_id(&self) -> &str {
        self.lifecycle.manager().server_id()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn workspaces(&self) -> &Arc<dyn WorkspaceService> {
        &self.workspaces
    }

    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }

    pub fn health(&self) -> &HealthReader {
        &self.reader
    }

    pub fn publisher(&self) -> &Arc<HealthPublisher> {
        &self.publisher
    }

    pub fn revisions(&self) -> &RevisionManager {
        &self.revisions
    }

    pub fn transfer(&self) -> &TransferManager {
        &self.transfer
    }

    pub fn workloads(&self) -> &WorkloadManager {
        &self.workloads
    }

    pub fn pipeline(&self) -> &PromotionPipeline {
        &self.pipeline
    }

    /// Start background tasks. Primary processes do not publish health.
    pub fn start(&self) {
        if self.config.server.primary {
            info!("primary process, health publication disabled");
            return;
        }
        let handle = self.publisher.spawn(self.shutdown.subscribe());
        self.lock_tasks().push(handle);
    }

    /// Mount every enabled workload on this process only. Returns how many
    /// mounted successfully.
    pub async fn mount_enabled_local(&self) -> GridResult<usize> {
        let manager = self.lifecycle.manager();
        let mut mounted = 0;
        for config in manager.registry().all().await? {
            if config.disabled {
                continue;
            }
            match manager.mount_local(&config.id).await {
                Ok(true) => mounted += 1,
                Ok(false) => {}
                Err(e) => warn!(workload_id = %config.id, error = %e, "workload not mounted"),
            }
        }
        info!(mounted, "enabled workloads mounted");
        Ok(mounted)
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.lock_tasks().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(server_id = %self.server_id(), error = %e, "background task ended abnormally");
            }
        }
        info!(server_id = %self.server_id(), "grid stopped");
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
