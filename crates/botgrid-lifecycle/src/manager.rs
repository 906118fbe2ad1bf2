//! Lifecycle manager — per-process mount and unmount of workloads.
//!
//! Steps inside one mount or unmount run strictly in sequence. Mount never
//! fails to its caller for operational reasons: loader failures become a
//! critical health event and `Ok(false)`. Only a stored configuration that
//! breaks the language invariant is returned as an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use botgrid_health::{HealthPublisher, HealthRegistry};
use botgrid_state::archive;
use botgrid_state::config::parse_duration;
use botgrid_state::validation::ensure_languages;
use botgrid_state::{
    ConfigStore, ContentStore, GridResult, HealthStatus, HookRunner, ServerId,
    StatKind, WorkloadConfig, WorkloadId, WorkloadRuntime,
};
use tracing::{debug, error, info, warn};

use crate::registry::WorkloadRegistry;

/// Packaged dependency cache of a workload, relative to its tree.
pub const DEPENDENCY_ARCHIVE: &str = "libraries/deps.tar.zst";

pub struct LifecycleManager {
    server_id: ServerId,
    registry: Arc<WorkloadRegistry>,
    content: Arc<dyn ContentStore>,
    configs: Arc<dyn ConfigStore>,
    runtime: Arc<dyn WorkloadRuntime>,
    hooks: Arc<dyn HookRunner>,
    health: HealthRegistry,
    publisher: Option<Arc<HealthPublisher>>,
    session_timeout: Duration,
    data_dir: Option<PathBuf>,
    mounted: Mutex<HashMap<WorkloadId, bool>>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_id: impl Into<ServerId>,
        registry: Arc<WorkloadRegistry>,
        content: Arc<dyn ContentStore>,
        configs: Arc<dyn ConfigStore>,
        runtime: Arc<dyn WorkloadRuntime>,
        hooks: Arc<dyn HookRunner>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            registry,
            content,
            configs,
            runtime,
            hooks,
            health,
            publisher: None,
            session_timeout: Duration::from_secs(30 * 60),
            data_dir: None,
            mounted: Mutex::new(HashMap::new()),
        }
    }

    /// Request an early health publication after mount and unmount.
    pub fn with_publisher(mut self, publisher: Arc<HealthPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Fleet-wide session timeout that workload settings are compared to.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Local directory receiving extracted dependency caches.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn is_mounted(&self, workload_id: &str) -> bool {
        self.mounted_map().get(workload_id).copied().unwrap_or(false)
    }

    /// Ids currently mounted in this process, sorted.
    pub fn mounted_ids(&self) -> Vec<WorkloadId> {
        let mut ids: Vec<_> = self
            .mounted_map()
            .iter()
            .filter(|(_, mounted)| **mounted)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn mounted_map(&self) -> std::sync::MutexGuard<'_, HashMap<WorkloadId, bool>> {
        self.mounted.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_mounted(&self, workload_id: &str, mounted: bool) {
        self.mounted_map().insert(workload_id.to_string(), mounted);
    }

    /// Local directory where a workload's dependencies are extracted.
    pub fn dependency_dir(&self, workload_id: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("workloads").join(workload_id).join("libraries"))
    }

    /// Mount a workload into this process.
    pub async fn mount_local(&self, workload_id: &str) -> GridResult<bool> {
        let started = Instant::now();

        match self
            .content
            .file_exists(workload_id, botgrid_state::DESCRIPTOR_FILE)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(%workload_id, "cannot mount workload: descriptor not found");
                return Ok(false);
            }
            Err(e) => {
                self.report_critical(workload_id, &e.to_string());
                return Ok(false);
            }
        }

        let config = match self.configs.get(workload_id).await {
            Ok(config) => config,
            Err(e) => {
                self.report_critical(workload_id, &e.to_string());
                return Ok(false);
            }
        };
        ensure_languages(&config)?;
        self.check_session_timeout(&config);

        if let Err(e) = self.load(workload_id).await {
            self.report_critical(workload_id, &format!("{e:#}"));
            return Ok(false);
        }

        self.extract_dependencies(workload_id).await;

        if let Err(e) = self.hooks.after_mount(workload_id).await {
            warn!(%workload_id, error = %e, "after-mount hook failed");
        }

        self.set_mounted(workload_id, true);
        self.registry.invalidate();
        self.health.set_status(workload_id, HealthStatus::Healthy);
        self.request_publish();

        debug!(
            %workload_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mount complete"
        );
        info!(%workload_id, server_id = %self.server_id, "workload mounted");
        Ok(true)
    }

    async fn load(&self, workload_id: &str) -> anyhow::Result<()> {
        self.runtime.load_messaging(workload_id).await?;
        self.runtime.load_content(workload_id).await?;
        self.runtime.load_modules(workload_id).await?;
        Ok(())
    }

    /// Unmount a workload from this process. A workload that is not mounted
    /// is left alone: no hook fires and its health is untouched.
    pub async fn unmount_local(&self, workload_id: &str) -> GridResult<()> {
        if !self.is_mounted(workload_id) {
            self.registry.invalidate();
            debug!(%workload_id, "unmount skipped, not mounted");
            return Ok(());
        }
        let started = Instant::now();

        if let Err(e) = self.runtime.clear_content(workload_id).await {
            warn!(%workload_id, error = %e, "failed to clear content cache");
        }
        if let Err(e) = self.runtime.unload_modules(workload_id).await {
            warn!(%workload_id, error = %e, "failed to unload modules");
        }
        if let Err(e) = self.runtime.unload_messaging(workload_id).await {
            warn!(%workload_id, error = %e, "failed to unload messaging");
        }
        if let Err(e) = self.hooks.after_unmount(workload_id).await {
            warn!(%workload_id, error = %e, "after-unmount hook failed");
        }

        self.set_mounted(workload_id, false);
        self.health.set_status(workload_id, HealthStatus::Disabled);
        self.request_publish();

        debug!(
            %workload_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "unmount complete"
        );
        info!(%workload_id, server_id = %self.server_id, "workload unmounted");
        Ok(())
    }

    /// Refresh a workload's local dependency cache. The process that
    /// initiated the sync already has the files and skips it.
    pub async fn sync_libs_local(&self, workload_id: &str, origin: &str) -> GridResult<bool> {
        if origin == self.server_id {
            return Ok(true);
        }
        Ok(self.extract_dependencies(workload_id).await)
    }

    /// Best-effort extraction of the packaged dependency archive. Returns
    /// false when extraction failed.
    async fn extract_dependencies(&self, workload_id: &str) -> bool {
        let Some(target) = self.dependency_dir(workload_id) else {
            return true;
        };
        let data = match self.content.read_file(workload_id, DEPENDENCY_ARCHIVE).await {
            Ok(Some(data)) => data,
            Ok(None) => return true,
            Err(e) => {
                warn!(%workload_id, error = %e, "cannot read dependency archive");
                return false;
            }
        };
        match archive::unpack_to_dir(data, &target).await {
            Ok(()) => {
                debug!(%workload_id, path = %target.display(), "dependencies synchronized");
                true
            }
            Err(e) => {
                warn!(%workload_id, error = %e, "cannot extract dependency archive");
                false
            }
        }
    }

    fn check_session_timeout(&self, config: &WorkloadConfig) {
        let Some(raw) = config
            .dialog
            .as_ref()
            .and_then(|d| d.timeout_interval.as_deref())
        else {
            return;
        };
        match parse_duration(raw) {
            Some(timeout) if timeout > self.session_timeout => warn!(
                workload_id = %config.id,
                workload_timeout = ?timeout,
                session_timeout = ?self.session_timeout,
                "workload dialog timeout is longer than the session timeout, conversations will expire first"
            ),
            Some(_) => {}
            None => warn!(workload_id = %config.id, value = %raw, "unparseable dialog timeout"),
        }
    }

    /// Record an error or warning against a workload.
    pub fn increment_stats(&self, workload_id: &str, kind: StatKind) {
        self.health.increment(workload_id, kind);
    }

    fn report_critical(&self, workload_id: &str, reason: &str) {
        error!(severity = "critical", %workload_id, error = %reason, "cannot mount workload");
        self.health.increment(workload_id, StatKind::Critical);
        self.request_publish();
    }

    fn request_publish(&self) {
        if let Some(publisher) = &self.publisher {
            publisher.request_publish();
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("server_id", &self.server_id)
            .field("mounted", &self.mounted_ids())
            .finish()
    }
}
