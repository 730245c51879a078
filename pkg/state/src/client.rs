use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use slatedb::object_store::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::watch::{EventLog, EventType};

/// Persistent state store backed by SlateDB.
///
/// Every successful put/delete is published on `event_log`, which is what
/// watchers (informers, the controller event feed) subscribe to.
///
/// Writes through clones of one store are serialized, so
/// [`StateStore::compare_and_put`] cannot interleave with another write.
#[derive(Clone)]
pub struct StateStore {
    db: Db,
    writes: Arc<Mutex<()>>,
    pub event_log: EventLog,
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        Self::open(object_store).await
    }

    /// Open a throwaway store that lives in memory only.
    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::open(Arc::new(InMemory::new())).await
    }

    async fn open(object_store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self {
            db,
            writes: Arc::new(Mutex::new(())),
            event_log: EventLog::new(),
        })
    }

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let _write = self.writes.lock().await;
        self.put_unlocked(key, value).await
    }

    /// Replace the value under `key` only if it still equals `expected`.
    /// Returns `false`, writing nothing, when the key was changed or removed.
    pub async fn compare_and_put(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> anyhow::Result<bool> {
        let _write = self.writes.lock().await;
        if self.get(key).await?.as_deref() != Some(expected) {
            return Ok(false);
        }
        self.put_unlocked(key, value).await?;
        Ok(true)
    }

    async fn put_unlocked(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.db
            .put(key.as_bytes(), value)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB put failed: {}", e))?;
        self.event_log
            .emit(EventType::Put, key.to_string(), Some(value.to_vec()));
        Ok(())
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.db.get(key.as_bytes()).await {
            Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("SlateDB get failed: {}", e)),
        }
    }

    /// Delete a key from the store. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let _write = self.writes.lock().await;
        self.db
            .delete(key.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB delete failed: {}", e))?;
        self.event_log.emit(EventType::Delete, key.to_string(), None);
        Ok(())
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    pub async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut results = Vec::new();
        let mut iter = self
            .db
            .scan_prefix(prefix.as_bytes())
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB scan_prefix failed: {}", e))?;

        while let Ok(Some(kv)) = iter.next().await {
            let key = String::from_utf8_lossy(&kv.key).to_string();
            results.push((key, kv.value.to_vec()));
        }
        Ok(results)
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing SlateDB state store");
        self.db
            .close()
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_publish_events() {
        let store = StateStore::in_memory().await.unwrap();
        let mut rx = store.event_log.subscribe();

        store.put("/registry/services/ns/a", b"{}").await.unwrap();
        assert_eq!(
            store.get("/registry/services/ns/a").await.unwrap(),
            Some(b"{}".to_vec())
        );
        store.delete("/registry/services/ns/a").await.unwrap();
        assert!(store.get("/registry/services/ns/a").await.unwrap().is_none());

        let put = rx.recv().await.unwrap();
        assert_eq!(put.event_type, EventType::Put);
        assert_eq!(put.key, "/registry/services/ns/a");
        let del = rx.recv().await.unwrap();
        assert_eq!(del.event_type, EventType::Delete);
    }

    #[tokio::test]
    async fn test_compare_and_put() {
        let store = StateStore::in_memory().await.unwrap();
        let key = "/registry/services/ns/a";
        assert!(!store.compare_and_put(key, b"v1", b"v2").await.unwrap());

        store.put(key, b"v1").await.unwrap();
        assert!(store.compare_and_put(key, b"v1", b"v2").await.unwrap());
        assert_eq!(store.get(key).await.unwrap(), Some(b"v2".to_vec()));

        // Stale expectation leaves the newer value alone
        let seq = store.event_log.current_seq();
        assert!(!store.compare_and_put(key, b"v1", b"v3").await.unwrap());
        assert_eq!(store.get(key).await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.event_log.current_seq(), seq);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = StateStore::in_memory().await.unwrap();
        store.put("/registry/services/ns/a", b"1").await.unwrap();
        store.put("/registry/services/ns/b", b"2").await.unwrap();
        store.put("/registry/events/ns/x", b"3").await.unwrap();

        let entries = store.list_prefix("/registry/services/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(k, _)| k.starts_with("/registry/services/")));
    }
}
