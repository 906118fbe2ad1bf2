//! Health publisher — writes this process's health map to the shared store.
//!
//! The publisher runs as a background task: it publishes on a fixed
//! interval, and early (after a short debounce) when something calls
//! [`HealthPublisher::request_publish`]. Each write carries a TTL so a
//! process that dies disappears from aggregated reads on its own.

use std::sync::Arc;
use std::time::Duration;

use botgrid_state::{
    ContentStore, DESCRIPTOR_FILE, HealthSnapshot, ServerId, SharedStore, StateError, StateResult,
};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::HealthRegistry;

/// Shared-store key of a process's health snapshot.
pub fn health_key(server_id: &str) -> String {
    format!("health:{server_id}")
}

pub struct HealthPublisher {
    registry: HealthRegistry,
    shared: Option<Arc<dyn SharedStore>>,
    content: Arc<dyn ContentStore>,
    server_id: ServerId,
    hostname: String,
    refresh_interval: Duration,
    expiry: Duration,
    debounce: Duration,
    wake: Notify,
}

impl HealthPublisher {
    pub fn new(
        registry: HealthRegistry,
        shared: Option<Arc<dyn SharedStore>>,
        content: Arc<dyn ContentStore>,
        server_id: impl Into<ServerId>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            shared,
            content,
            server_id: server_id.into(),
            hostname: hostname.into(),
            refresh_interval: Duration::from_secs(15),
            expiry: Duration::from_secs(20),
            debounce: Duration::from_millis(500),
            wake: Notify::new(),
        }
    }

    pub fn with_timing(mut self, refresh_interval: Duration, expiry: Duration, debounce: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self.expiry = expiry;
        self.debounce = debounce;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Ask the background loop to publish soon. Requests arriving within
    /// the debounce window collapse into one write.
    pub fn request_publish(&self) {
        self.wake.notify_one();
    }

    /// The snapshot this process would publish right now.
    pub fn local_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            server_id: self.server_id.clone(),
            hostname: self.hostname.clone(),
            workloads: self.registry.snapshot(),
        }
    }

    /// Prune records of deleted workloads, then write the snapshot with TTL.
    pub async fn publish_once(&self) -> StateResult<()> {
        let live = self.content.list_workloads_with(DESCRIPTOR_FILE).await?;
        let pruned = self.registry.prune(&live);
        if pruned > 0 {
            debug!(pruned, "dropped health of deleted workloads");
        }

        let Some(shared) = &self.shared else {
            return Ok(());
        };
        let snapshot = self.local_snapshot();
        let data =
            serde_json::to_vec(&snapshot).map_err(|e| StateError::Serialize(e.to_string()))?;
        shared
            .set(&health_key(&self.server_id), &data, self.expiry)
            .await?;
        debug!(
            server_id = %self.server_id,
            workloads = snapshot.workloads.len(),
            "health snapshot published"
        );
        Ok(())
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        // The first tick completes immediately.
        ticker.tick().await;
        self.publish_logged().await;
        info!(
            server_id = %self.server_id,
            interval = ?self.refresh_interval,
            expiry = ?self.expiry,
            "health publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.publish_logged().await;
                }
                _ = self.wake.notified() => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.debounce) => self.publish_logged().await,
                        _ = shutdown.changed() => break,
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(server_id = %self.server_id, "health publisher stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(shutdown))
    }

    async fn publish_logged(&self) {
        if let Err(e) = self.publish_once().await {
            warn!(server_id = %self.server_id, error = %e, "failed to publish health snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgrid_state::{HealthStatus, MemorySharedStore, StateStore};

    async fn setup(ids: &[&str]) -> (HealthRegistry, MemorySharedStore, Arc<HealthPublisher>) {
        let content = StateStore::open_in_memory().unwrap();
        for id in ids {
            content.write_file(id, DESCRIPTOR_FILE, b"{}").await.unwrap();
        }
        let registry = HealthRegistry::new();
        let shared = MemorySharedStore::new();
        let publisher = HealthPublisher::new(
            registry.clone(),
            Some(Arc::new(shared.clone())),
            Arc::new(content),
            "node-1",
            "host-a",
        );
        (registry, shared, Arc::new(publisher))
    }

    fn decode(raw: &[u8]) -> HealthSnapshot {
        serde_json::from_slice(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn publish_writes_snapshot_with_ttl() {
        let (registry, shared, publisher) = setup(&["s1"]).await;
        registry.set_status("s1", HealthStatus::Healthy);
        publisher.publish_once().await.unwrap();

        let raw = shared.get("health:node-1").await.unwrap().unwrap();
        let snap = decode(&raw);
        assert_eq!(snap.server_id, "node-1");
        assert_eq!(snap.hostname, "host-a");
        assert_eq!(snap.workloads["s1"].status, HealthStatus::Healthy);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(shared.get("health:node-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_prunes_deleted_workloads() {
        let (registry, shared, publisher) = setup(&["s1"]).await;
        registry.set_status("s1", HealthStatus::Healthy);
        registry.set_status("gone", HealthStatus::Healthy);
        publisher.publish_once().await.unwrap();

        assert!(registry.get("gone").is_none());
        let snap = decode(&shared.get("health:node-1").await.unwrap().unwrap());
        assert!(!snap.workloads.contains_key("gone"));
    }

    #[tokio::test]
    async fn publish_without_shared_store_is_local_only() {
        let content = StateStore::open_in_memory().unwrap();
        let registry = HealthRegistry::new();
        registry.set_status("orphan", HealthStatus::Healthy);
        let publisher =
            HealthPublisher::new(registry.clone(), None, Arc::new(content), "n", "h");
        publisher.publish_once().await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_publishes_on_interval_and_keeps_key_alive() {
        let (registry, shared, publisher) = setup(&["s1"]).await;
        registry.set_status("s1", HealthStatus::Healthy);
        let (tx, rx) = watch::channel(false);
        let handle = publisher.spawn(rx);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(shared.get("health:node-1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(shared.get("health:node-1").await.unwrap().is_some());

        tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(shared.get("health:node-1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_publishes_on_start() {
        let (registry, shared, publisher) = setup(&["s1"]).await;
        registry.set_status("s1", HealthStatus::Healthy);
        let (tx, rx) = watch::channel(false);
        let handle = publisher.spawn(rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snap = decode(&shared.get("health:node-1").await.unwrap().unwrap());
        assert_eq!(snap.workloads["s1"].status, HealthStatus::Healthy);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn request_publish_is_debounced() {
        let (registry, shared, publisher) = setup(&["s1"]).await;
        let (_tx, rx) = watch::channel(false);
        let _handle = publisher.spawn(rx);
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.set_status("s1", HealthStatus::Healthy);
        publisher.request_publish();
        publisher.request_publish();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snap = decode(&shared.get("health:node-1").await.unwrap().unwrap());
        assert!(!snap.workloads.contains_key("s1"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let snap = decode(&shared.get("health:node-1").await.unwrap().unwrap());
        assert_eq!(snap.workloads["s1"].status, HealthStatus::Healthy);
    }
}
