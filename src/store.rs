//! Keyed store tying a backend table and a codec together.

use crate::backend::Backend;
use crate::codec::{Codec, JsonCodec};
use crate::error::{Result, StoreError};
use crate::subscriptions::LiveQuery;
use crate::types::{ContentPath, DeletePolicy, StoreValue};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, trace};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Backend table holding this store's rows.
    pub table: String,

    /// How open subscriptions react to deletes.
    pub delete_policy: DeletePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: "records".to_string(),
            delete_policy: DeletePolicy::Silent,
        }
    }
}

/// Reads and decodes rows of one table. Shared with live subscriptions.
pub(crate) struct RowSource<V: StoreValue> {
    pub(crate) backend: Arc<dyn Backend>,
    codec: Arc<dyn Codec<V>>,
    table: String,
}

impl<V: StoreValue> RowSource<V> {
    /// Current value for a row key, `None` when absent.
    pub(crate) fn read(&self, row_key: &str) -> Result<Option<V>> {
        let rows = self.backend.query(&self.table, Some(row_key))?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.codec.decode(&row.data)?)),
            None => Ok(None),
        }
    }

    fn read_all(&self) -> Result<Vec<V>> {
        self.backend
            .query(&self.table, None)?
            .iter()
            .map(|row| self.codec.decode(&row.data))
            .collect()
    }

    pub(crate) fn row_path(&self, row_key: &str) -> ContentPath {
        self.backend.row_path(&self.table, row_key)
    }
}

/// A persistent, keyed cache of `V` with deduplicated writes and live
/// per-key subscriptions.
///
/// Reads return the value's absence marker ([`StoreValue::none`]) rather
/// than an error when a key has no row.
pub struct KeyedStore<V: StoreValue> {
    config: StoreConfig,
    source: Arc<RowSource<V>>,

    /// Serializes the read-compare-write sequence of put/delete/clear.
    write_lock: Mutex<()>,

    next_subscription_id: Arc<AtomicU64>,
}

impl<V: StoreValue> KeyedStore<V> {
    /// Create a store over an injected backend and codec.
    pub fn new(backend: Arc<dyn Backend>, codec: Arc<dyn Codec<V>>, config: StoreConfig) -> Self {
        debug!(
            table = %config.table,
            authority = backend.authority(),
            "creating keyed store"
        );
        Self {
            source: Arc::new(RowSource {
                backend,
                codec,
                table: config.table.clone(),
            }),
            config,
            write_lock: Mutex::new(()),
            next_subscription_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a store whose rows are JSON.
    pub fn with_json(backend: Arc<dyn Backend>, config: StoreConfig) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        Self::new(backend, Arc::new(JsonCodec::<V>::new()), config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path notified when the row for `key` changes.
    pub fn path_for(&self, key: &V::Key) -> ContentPath {
        self.source.row_path(&key.to_string())
    }

    // --- Writes ---

    /// Insert or update `value` under its key.
    ///
    /// Returns `false` without writing (and without notifying) when the
    /// stored value is structurally equal to `value`.
    pub fn put(&self, value: &V) -> Result<bool> {
        if value.is_none() {
            return Err(StoreError::InvalidValue(
                "the absence marker cannot be stored".into(),
            ));
        }

        let row_key = value.key().to_string();
        let table = &self.config.table;
        let _lock = self.write_lock.lock();

        match self.source.read(&row_key)? {
            Some(existing) if existing == *value => {
                trace!(table = %table, key = %row_key, "put skipped, identical value");
                Ok(false)
            }
            Some(_) => {
                let data = self.source.codec.encode(value)?;
                let updated = self.source.backend.update(table, &row_key, data)?;
                debug!(table = %table, key = %row_key, updated, "updated row");
                Ok(updated)
            }
            None => {
                let data = self.source.codec.encode(value)?;
                self.source.backend.insert(table, &row_key, data)?;
                debug!(table = %table, key = %row_key, "inserted row");
                Ok(true)
            }
        }
    }

    /// Delete the row for `key`. Returns `false` if there was none.
    pub fn delete(&self, key: &V::Key) -> Result<bool> {
        let row_key = key.to_string();
        let _lock = self.write_lock.lock();

        let removed = self.source.backend.delete(&self.config.table, &row_key)? > 0;
        debug!(table = %self.config.table, key = %row_key, removed, "delete");
        Ok(removed)
    }

    /// Delete every row in this store's table. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let _lock = self.write_lock.lock();

        let removed = self.source.backend.delete_all(&self.config.table)?;
        debug!(table = %self.config.table, removed, "cleared table");
        Ok(removed)
    }

    // --- Reads ---

    /// The value stored for `key`, or the absence marker.
    pub fn get_once(&self, key: &V::Key) -> Result<V> {
        Ok(self
            .source
            .read(&key.to_string())?
            .unwrap_or_else(V::none))
    }

    /// Every stored value, in insertion order.
    pub fn get_all(&self) -> Result<Vec<V>> {
        self.source.read_all()
    }

    /// A live view of `key`.
    ///
    /// The current value is captured now, when the query is built. Each
    /// [`LiveQuery::subscribe`] replays that snapshot first and then follows
    /// changes committed after it subscribed.
    pub fn get_once_and_stream(&self, key: &V::Key) -> Result<LiveQuery<V>> {
        let snapshot = self.get_once(key)?;
        Ok(LiveQuery::new(
            key.clone(),
            snapshot,
            Arc::clone(&self.source),
            self.config.delete_policy,
            Arc::clone(&self.next_subscription_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u32,
        text: String,
    }

    impl StoreValue for Note {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }

        fn none() -> Self {
            Note {
                id: 0,
                text: String::new(),
            }
        }
    }

    fn note(id: u32, text: &str) -> Note {
        Note {
            id,
            text: text.to_string(),
        }
    }

    fn test_store() -> (Arc<MemoryBackend>, KeyedStore<Note>) {
        let backend = Arc::new(MemoryBackend::with_authority("notes"));
        let store = KeyedStore::with_json(
            backend.clone(),
            StoreConfig {
                table: "notes".to_string(),
                ..Default::default()
            },
        );
        (backend, store)
    }

    #[test]
    fn test_put_dedups_against_stored_row() {
        let (backend, store) = test_store();

        assert!(store.put(&note(1, "a")).unwrap());
        assert!(!store.put(&note(1, "a")).unwrap());
        assert!(store.put(&note(1, "b")).unwrap());

        // Upsert never duplicates rows
        assert_eq!(backend.query("notes", None).unwrap().len(), 1);
        assert_eq!(store.get_once(&1).unwrap(), note(1, "b"));
    }

    #[test]
    fn test_differing_put_updates_in_place() {
        let (backend, store) = test_store();
        store.put(&note(1, "a")).unwrap();
        store.put(&note(2, "b")).unwrap();
        let rowid = backend.query("notes", Some("1")).unwrap()[0].rowid;

        assert!(store.put(&note(1, "c")).unwrap());

        let rows = backend.query("notes", None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rowid, rowid);
        assert_eq!(rows[0].key, "1");
        assert_eq!(
            store.get_all().unwrap(),
            vec![note(1, "c"), note(2, "b")]
        );
    }

    #[test]
    fn test_identical_put_does_not_notify() {
        let (backend, store) = test_store();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        backend.register_change_listener(
            store.path_for(&1),
            Arc::new(move |_: &ContentPath| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );

        store.put(&note(1, "a")).unwrap();
        store.put(&note(1, "a")).unwrap();
        store.put(&note(1, "a")).unwrap();

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_put_rejects_absence_marker() {
        let (_, store) = test_store();
        let result = store.put(&Note::none());
        assert!(matches!(result, Err(StoreError::InvalidValue(_))));
    }

    #[test]
    fn test_get_once_absent_is_none_marker() {
        let (_, store) = test_store();
        assert_eq!(store.get_once(&42).unwrap(), Note::none());
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let (_, store) = test_store();
        store.put(&note(1, "a")).unwrap();
        store.put(&note(2, "b")).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.get_all().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_stores_share_backend_by_table() {
        let backend = Arc::new(MemoryBackend::new());
        let first: KeyedStore<Note> = KeyedStore::with_json(
            backend.clone(),
            StoreConfig {
                table: "first".to_string(),
                ..Default::default()
            },
        );
        let second: KeyedStore<Note> = KeyedStore::with_json(
            backend.clone(),
            StoreConfig {
                table: "second".to_string(),
                ..Default::default()
            },
        );

        first.put(&note(1, "first")).unwrap();
        assert_eq!(second.get_once(&1).unwrap(), Note::none());
        assert!(second.put(&note(1, "second")).unwrap());
        assert_eq!(first.get_once(&1).unwrap(), note(1, "first"));
    }

    #[test]
    fn test_path_for() {
        let (_, store) = test_store();
        assert_eq!(store.path_for(&7).to_string(), "content://notes/notes/7");
    }
}
