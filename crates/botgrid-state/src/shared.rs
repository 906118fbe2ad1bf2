//! In-process SharedStore with per-key expiry.
//!
//! Expiry uses `tokio::time::Instant`, so tests can drive it with a paused
//! clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::StateResult;
use crate::traits::SharedStore;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySharedStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Every `set` also does this.
    pub async fn purge_expired(&self) -> usize {
        let mut data = self.data.write().await;
        purge(&mut data, Instant::now())
    }
}

fn purge(data: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = data.len();
    data.retain(|_, entry| entry.live(now));
    before - data.len()
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        purge(&mut data, now);
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        let now = Instant::now();
        let data = self.data.read().await;
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(k, entry)| entry.live(now) && matches(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> StateResult<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|k| {
                data.get(k)
                    .filter(|entry| entry.live(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemorySharedStore::new();
        store
            .set("health:a", b"1", Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(store.get("health:a").await.unwrap(), Some(b"1".to_vec()));

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(store.get("health:a").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("health:a").await.unwrap().is_none());
        assert!(store.keys("health:*").await.unwrap().is_empty());
        assert_eq!(store.purge_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_drops_expired_entries() {
        let store = MemorySharedStore::new();
        store
            .set("health:gone", b"1", Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        store
            .set("health:live", b"2", Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(store.data.read().await.len(), 1);
        assert_eq!(store.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn keys_pattern_and_mget() {
        let store = MemorySharedStore::new();
        let ttl = Duration::from_secs(60);
        store.set("health:b", b"b", ttl).await.unwrap();
        store.set("health:a", b"a", ttl).await.unwrap();
        store.set("other", b"o", ttl).await.unwrap();

        let keys = store.keys("health:*").await.unwrap();
        assert_eq!(keys, vec!["health:a", "health:b"]);
        assert_eq!(store.keys("other").await.unwrap(), vec!["other"]);

        let values = store
            .mget(&["health:a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some(b"a".to_vec()), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_ttl() {
        let store = MemorySharedStore::new();
        let ttl = Duration::from_secs(20);
        store.set("k", b"1", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;
        store.set("k", b"2", ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"2".to_vec()));
    }
}
