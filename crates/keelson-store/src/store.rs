//! redb-backed key-value records for keelson.
//!
//! Provides the primitives the control plane relies on for durability and
//! mutual exclusion. Values are opaque strings (callers store JSON). The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::KEYS;

/// Every key is stored below this prefix.
pub const ROOT_NAMESPACE: &str = "/keelson";

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct CoordinationStore {
    db: Arc<Database>,
}

impl CoordinationStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(KEYS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read the value stored at `key`.
    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let full = full_key(key)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        match table.get(full.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Store `value` at `key`. Fails with [`StoreError::AlreadyExists`] if
    /// the key is already present.
    pub fn create(&self, key: &str, value: &str) -> StoreResult<()> {
        let full = full_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            if table.get(full.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            table
                .insert(full.as_str(), value.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "key created");
        Ok(())
    }

    /// Replace the value at an existing `key`. Fails with
    /// [`StoreError::NotFound`] if the key is absent.
    pub fn update(&self, key: &str, value: &str) -> StoreResult<()> {
        let full = full_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            if table.get(full.as_str()).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::NotFound(key.to_string()));
            }
            table
                .insert(full.as_str(), value.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Delete `key`. Returns true if it existed.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let full = full_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            existed = table.remove(full.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "key deleted");
        Ok(existed)
    }

    /// Atomically replace the value at `key` with `next`, but only if the
    /// current value is exactly `prev`.
    ///
    /// Fails with [`StoreError::CompareFailed`] when another writer changed
    /// the value since it was read, and [`StoreError::NotFound`] when the key
    /// is gone.
    pub fn compare_and_swap(&self, key: &str, prev: &str, next: &str) -> StoreResult<()> {
        let full = full_key(key)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KEYS).map_err(map_err!(Table))?;
            let current = match table.get(full.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::NotFound(key.to_string())),
            };
            if current != prev {
                return Err(StoreError::CompareFailed(key.to_string()));
            }
            table
                .insert(full.as_str(), next.as_bytes())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "compare-and-swap applied");
        Ok(())
    }

    /// List every `(key, value)` pair whose key lies under the directory
    /// `prefix`, in key order. Returned keys are relative to the root
    /// namespace, like the keys callers pass in.
    pub fn list(&self, prefix: &str) -> StoreResult<Vec<(String, String)>> {
        let dir = format!("{}/", full_key(prefix)?.trim_end_matches('/'));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KEYS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if let Some(relative) = key.strip_prefix(ROOT_NAMESPACE) {
                if key.starts_with(&dir) {
                    results.push((relative.to_string(), decode(value.value())?));
                }
            }
        }
        Ok(results)
    }
}

fn full_key(key: &str) -> StoreResult<String> {
    if !key.starts_with('/') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(format!("{ROOT_NAMESPACE}{key}"))
}

fn decode(bytes: &[u8]) -> StoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(map_err!(Read))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> CoordinationStore {
        CoordinationStore::open_in_memory().unwrap()
    }

    // ── Basic CRUD ─────────────────────────────────────────────────

    #[test]
    fn create_and_get() {
        let store = test_store();
        store.create("/nodes/i-1", r#"{"id":"i-1"}"#).unwrap();

        let value = store.get("/nodes/i-1").unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"id":"i-1"}"#));
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = test_store();
        assert!(store.get("/nodes/nothing").unwrap().is_none());
    }

    #[test]
    fn create_twice_is_rejected() {
        let store = test_store();
        store.create("/tasks/abc", "first").unwrap();

        let err = store.create("/tasks/abc", "second").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert!(err.is_conflict());
        assert_eq!(store.get("/tasks/abc").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn update_requires_existing_key() {
        let store = test_store();
        let err = store.update("/tasks/abc", "v").unwrap_err();
        assert!(err.is_not_found());

        store.create("/tasks/abc", "v1").unwrap();
        store.update("/tasks/abc", "v2").unwrap();
        assert_eq!(store.get("/tasks/abc").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn delete_reports_existence() {
        let store = test_store();
        store.create("/apps/web", "{}").unwrap();

        assert!(store.delete("/apps/web").unwrap());
        assert!(!store.delete("/apps/web").unwrap());
        assert!(store.get("/apps/web").unwrap().is_none());
    }

    #[test]
    fn keys_must_be_absolute() {
        let store = test_store();
        let err = store.create("tasks/abc", "v").unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    // ── Compare-and-swap ───────────────────────────────────────────

    #[test]
    fn cas_succeeds_on_matching_value() {
        let store = test_store();
        store.create("/tasks/t", "queued").unwrap();

        store.compare_and_swap("/tasks/t", "queued", "running").unwrap();
        assert_eq!(store.get("/tasks/t").unwrap().as_deref(), Some("running"));
    }

    #[test]
    fn cas_fails_on_stale_value() {
        let store = test_store();
        store.create("/tasks/t", "queued").unwrap();
        store.compare_and_swap("/tasks/t", "queued", "running").unwrap();

        let err = store
            .compare_and_swap("/tasks/t", "queued", "running")
            .unwrap_err();
        assert!(matches!(err, StoreError::CompareFailed(_)));
        assert!(err.is_conflict());
    }

    #[test]
    fn cas_on_missing_key_is_not_found() {
        let store = test_store();
        let err = store.compare_and_swap("/tasks/t", "a", "b").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn concurrent_cas_has_exactly_one_winner() {
        let store = test_store();
        store.create("/tasks/t", "queued").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .compare_and_swap("/tasks/t", "queued", &format!("running:{i}"))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(store.get("/tasks/t").unwrap().unwrap().starts_with("running:"));
    }

    // ── Listing ────────────────────────────────────────────────────

    #[test]
    fn list_returns_directory_children_in_order() {
        let store = test_store();
        store.create("/tasks/b", "2").unwrap();
        store.create("/tasks/a", "1").unwrap();
        store.create("/tasksets/x", "nope").unwrap();
        store.create("/nodes/i-1", "node").unwrap();

        let tasks = store.list("/tasks").unwrap();
        assert_eq!(
            tasks,
            vec![
                ("/tasks/a".to_string(), "1".to_string()),
                ("/tasks/b".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn list_empty_directory() {
        let store = test_store();
        assert!(store.list("/tasks").unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("keelson.redb");

        {
            let store = CoordinationStore::open(&db_path).unwrap();
            store.create("/tasks/abc", "queued").unwrap();
        }

        let store = CoordinationStore::open(&db_path).unwrap();
        assert_eq!(store.get("/tasks/abc").unwrap().as_deref(), Some("queued"));
    }
}
