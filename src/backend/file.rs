//! Durable table backend over an operation log.
//!
//! On open the log is replayed into an in-memory index of
//! `table -> key -> (rowid, frame offset)`. Row data stays on disk and is
//! read back through a small LRU cache.

use super::log::{LogOp, OperationLog};
use super::Backend;
use crate::error::{Result, StoreError};
use crate::notify::{ChangeCallback, ChangeRegistry};
use crate::types::{ContentPath, ListenerId, Row};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Magic bytes for the backend manifest.
const MANIFEST_MAGIC: &[u8; 4] = b"KST\0";

/// Current manifest format version.
const MANIFEST_VERSION: u8 = 1;

/// File backend configuration.
#[derive(Clone, Debug)]
pub struct FileBackendConfig {
    /// Directory holding the manifest, lock file and log.
    pub path: PathBuf,

    /// Authority used in change-notification paths.
    pub authority: String,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the log every N writes (1 = every write).
    pub sync_interval: u64,

    /// Number of rows kept in the read cache.
    pub row_cache_size: usize,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./keyed-store"),
            authority: "keyed-store".to_string(),
            create_if_missing: true,
            sync_interval: 1,
            row_cache_size: 256,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    rowid: u64,
    offset: u64,
}

type TableIndex = HashMap<String, BTreeMap<String, IndexEntry>>;

struct Index {
    tables: TableIndex,
    next_rowid: u64,
}

/// Tables persisted in an append-only, checksummed log.
pub struct FileBackend {
    config: FileBackendConfig,
    _lock_file: File,
    log: OperationLog,
    index: RwLock<Index>,
    cache: Mutex<LruCache<(String, String), Row>>,
    registry: ChangeRegistry,
}

impl FileBackend {
    /// Open an existing backend or create a new one.
    pub fn open_or_create(config: FileBackendConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new backend directory.
    pub fn create(config: FileBackendConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::open(config)
    }

    /// Open an existing backend directory, replaying its log.
    pub fn open(config: FileBackendConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, entries) = OperationLog::open(config.path.join("rows.log"), config.sync_interval)?;

        let mut tables: TableIndex = HashMap::new();
        let mut next_rowid = 1;
        for (offset, entry) in entries {
            match entry.op {
                LogOp::Put {
                    table, key, rowid, ..
                } => {
                    next_rowid = next_rowid.max(rowid + 1);
                    tables
                        .entry(table)
                        .or_default()
                        .insert(key, IndexEntry { rowid, offset });
                }
                LogOp::Delete { table, key } => {
                    if let Some(rows) = tables.get_mut(&table) {
                        rows.remove(&key);
                    }
                }
                LogOp::Clear { table } => {
                    tables.remove(&table);
                }
            }
        }

        let rows: usize = tables.values().map(|t| t.len()).sum();
        info!(path = %config.path.display(), rows, "opened file backend");

        let cache_size = NonZeroUsize::new(config.row_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            _lock_file: lock_file,
            log,
            index: RwLock::new(Index { tables, next_rowid }),
            cache: Mutex::new(LruCache::new(cache_size)),
            registry: ChangeRegistry::new(),
            config,
        })
    }

    /// Directory of this backend.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of live rows across all tables.
    pub fn row_count(&self) -> usize {
        self.index.read().tables.values().map(|t| t.len()).sum()
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }

    /// Rewrite the log to hold only live rows. Returns bytes reclaimed.
    pub fn compact(&self) -> Result<u64> {
        let mut index = self.index.write();
        let before = self.log.size();

        let mut live: Vec<(String, String, IndexEntry)> = index
            .tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.iter()
                    .map(move |(key, entry)| (table.clone(), key.clone(), *entry))
            })
            .collect();
        live.sort_by_key(|(_, _, e)| e.rowid);

        let mut ops = Vec::with_capacity(live.len());
        for (table, key, entry) in &live {
            let data = self.read_data(table, key, entry.offset)?;
            ops.push(LogOp::Put {
                table: table.clone(),
                key: key.clone(),
                rowid: entry.rowid,
                data,
            });
        }

        let offsets = self.log.rewrite(ops)?;
        for ((table, key, entry), offset) in live.into_iter().zip(offsets) {
            if let Some(rows) = index.tables.get_mut(&table) {
                rows.insert(key, IndexEntry { offset, ..entry });
            }
        }

        let reclaimed = before.saturating_sub(self.log.size());
        debug!(reclaimed, "compacted operation log");
        Ok(reclaimed)
    }

    fn read_data(&self, table: &str, key: &str, offset: u64) -> Result<Vec<u8>> {
        match self.log.read_at(offset)?.op {
            LogOp::Put {
                table: t,
                key: k,
                data,
                ..
            } if t == table && k == key => Ok(data),
            other => Err(StoreError::Corruption(format!(
                "index for {}/{} points at {:?}",
                table, key, other
            ))),
        }
    }

    fn read_row(&self, table: &str, key: &str, entry: IndexEntry) -> Result<Row> {
        let cache_key = (table.to_string(), key.to_string());
        if let Some(row) = self.cache.lock().get(&cache_key) {
            return Ok(row.clone());
        }

        let row = Row {
            rowid: entry.rowid,
            key: key.to_string(),
            data: self.read_data(table, key, entry.offset)?,
        };
        self.cache.lock().put(cache_key, row.clone());
        Ok(row)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(MANIFEST_MAGIC)?;
        file.write_all(&[MANIFEST_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(StoreError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MANIFEST_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid manifest magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != MANIFEST_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported manifest version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Backend for FileBackend {
    fn authority(&self) -> &str {
        &self.config.authority
    }

    fn insert(&self, table: &str, key: &str, data: Vec<u8>) -> Result<Row> {
        let row = {
            let mut index = self.index.write();
            let exists = index
                .tables
                .get(table)
                .is_some_and(|rows| rows.contains_key(key));
            if exists {
                return Err(StoreError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                });
            }

            let rowid = index.next_rowid;
            let offset = self.log.append(LogOp::Put {
                table: table.to_string(),
                key: key.to_string(),
                rowid,
                data: data.clone(),
            })?;
            index.next_rowid += 1;
            index
                .tables
                .entry(table.to_string())
                .or_default()
                .insert(key.to_string(), IndexEntry { rowid, offset });

            let row = Row {
                rowid,
                key: key.to_string(),
                data,
            };
            self.cache
                .lock()
                .put((table.to_string(), key.to_string()), row.clone());
            row
        };

        self.registry.notify(&self.row_path(table, key));
        Ok(row)
    }

    fn update(&self, table: &str, key: &str, data: Vec<u8>) -> Result<bool> {
        {
            let mut index = self.index.write();
            let Some(entry) = index.tables.get(table).and_then(|rows| rows.get(key)).copied()
            else {
                return Ok(false);
            };

            let offset = self.log.append(LogOp::Put {
                table: table.to_string(),
                key: key.to_string(),
                rowid: entry.rowid,
                data: data.clone(),
            })?;
            if let Some(rows) = index.tables.get_mut(table) {
                rows.insert(key.to_string(), IndexEntry { offset, ..entry });
            }
            self.cache.lock().put(
                (table.to_string(), key.to_string()),
                Row {
                    rowid: entry.rowid,
                    key: key.to_string(),
                    data,
                },
            );
        }

        self.registry.notify(&self.row_path(table, key));
        Ok(true)
    }

    fn delete(&self, table: &str, key: &str) -> Result<usize> {
        {
            let mut index = self.index.write();
            let exists = index
                .tables
                .get(table)
                .is_some_and(|rows| rows.contains_key(key));
            if !exists {
                return Ok(0);
            }

            self.log.append(LogOp::Delete {
                table: table.to_string(),
                key: key.to_string(),
            })?;
            if let Some(rows) = index.tables.get_mut(table) {
                rows.remove(key);
            }
            self.cache.lock().pop(&(table.to_string(), key.to_string()));
        }

        self.registry.notify(&self.row_path(table, key));
        Ok(1)
    }

    fn delete_all(&self, table: &str) -> Result<usize> {
        let removed = {
            let mut index = self.index.write();
            let count = index.tables.get(table).map(|rows| rows.len()).unwrap_or(0);
            if count == 0 {
                return Ok(0);
            }

            self.log.append(LogOp::Clear {
                table: table.to_string(),
            })?;
            index.tables.remove(table);
            self.cache.lock().clear();
            count
        };

        self.registry.notify(&self.table_path(table));
        Ok(removed)
    }

    fn query(&self, table: &str, key: Option<&str>) -> Result<Vec<Row>> {
        let index = self.index.read();
        let Some(rows) = index.tables.get(table) else {
            return Ok(Vec::new());
        };

        match key {
            Some(key) => match rows.get(key) {
                Some(entry) => Ok(vec![self.read_row(table, key, *entry)?]),
                None => Ok(Vec::new()),
            },
            None => {
                let mut entries: Vec<(&String, &IndexEntry)> = rows.iter().collect();
                entries.sort_by_key(|(_, e)| e.rowid);
                entries
                    .into_iter()
                    .map(|(key, entry)| self.read_row(table, key, *entry))
                    .collect()
            }
        }
    }

    fn register_change_listener(
        &self,
        path: ContentPath,
        callback: ChangeCallback,
    ) -> ListenerId {
        self.registry.register(path, callback)
    }

    fn unregister_change_listener(&self, id: ListenerId) -> bool {
        self.registry.unregister(id)
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.log.sync();
    }
}
