//! StateStore — redb-backed workload trees and archives.
//!
//! Files are stored under `{workload_id}/{relative_path}` keys and archives
//! under `{namespace}/{name}` keys, both as raw bytes. The store supports
//! on-disk and in-memory backends (the latter for tests and single-process
//! deployments).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::{ARCHIVES, ByteTable, FILES};
use crate::traits::{ArchiveStore, ContentStore};
use crate::types::FileEntry;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(FILES).map_err(map_err!(Table))?;
        txn.open_table(ARCHIVES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_raw(
        &self,
        def: ByteTable,
        key: &str,
        value: &[u8],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_raw(&self, def: ByteTable, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    fn remove_raw(&self, def: ByteTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Keys of `def` starting with `prefix`, with the prefix stripped.
    fn suffixes(&self, def: ByteTable, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(rest) = key.value().strip_prefix(prefix) {
                results.push(rest.to_string());
            }
        }
        Ok(results)
    }
}

fn file_key(workload_id: &str, path: &str) -> String {
    format!("{workload_id}/{path}")
}

#[async_trait]
impl ContentStore for StateStore {
    async fn list_workloads_with(&self, file_name: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FILES).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some((id, path)) = key.value().split_once('/') {
                if path == file_name {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    async fn list_files(&self, workload_id: &str) -> StateResult<Vec<String>> {
        self.suffixes(FILES, &format!("{workload_id}/"))
    }

    async fn file_exists(&self, workload_id: &str, path: &str) -> StateResult<bool> {
        Ok(self.get_raw(FILES, &file_key(workload_id, path))?.is_some())
    }

    async fn read_file(&self, workload_id: &str, path: &str) -> StateResult<Option<Vec<u8>>> {
        self.get_raw(FILES, &file_key(workload_id, path))
    }

    async fn write_file(&self, workload_id: &str, path: &str, content: &[u8]) -> StateResult<()> {
        self.put_raw(FILES, &file_key(workload_id, path), content)?;
        debug!(%workload_id, %path, size = content.len(), "file written");
        Ok(())
    }

    async fn delete_file(&self, workload_id: &str, path: &str) -> StateResult<bool> {
        self.remove_raw(FILES, &file_key(workload_id, path))
    }

    async fn delete_tree(&self, workload_id: &str) -> StateResult<u32> {
        let prefix = format!("{workload_id}/");
        let paths = self.suffixes(FILES, &prefix)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0u32;
        {
            let mut table = txn.open_table(FILES).map_err(map_err!(Table))?;
            for path in &paths {
                let key = format!("{prefix}{path}");
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%workload_id, count, "workload tree deleted");
        Ok(count)
    }

    async fn replace_tree(&self, workload_id: &str, files: Vec<FileEntry>) -> StateResult<()> {
        let prefix = format!("{workload_id}/");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FILES).map_err(map_err!(Table))?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, _) = entry.map_err(map_err!(Read))?;
                if key.value().starts_with(&prefix) {
                    stale.push(key.value().to_string());
                }
            }
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for file in &files {
                let key = file_key(workload_id, &file.path);
                table
                    .insert(key.as_str(), file.content.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%workload_id, files = files.len(), "workload tree replaced");
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for StateStore {
    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StateResult<()> {
        self.put_raw(ARCHIVES, &format!("{namespace}/{name}"), data)?;
        debug!(%namespace, %name, size = data.len(), "archive stored");
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> StateResult<Option<Vec<u8>>> {
        self.get_raw(ARCHIVES, &format!("{namespace}/{name}"))
    }

    async fn list(&self, namespace: &str) -> StateResult<Vec<String>> {
        self.suffixes(ARCHIVES, &format!("{namespace}/"))
    }

    async fn delete(&self, namespace: &str, name: &str) -> StateResult<bool> {
        let existed = self.remove_raw(ARCHIVES, &format!("{namespace}/{name}"))?;
        debug!(%namespace, %name, existed, "archive deleted");
        Ok(existed)
    }
}
