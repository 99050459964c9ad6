//! In-memory table backend.

use super::Backend;
use crate::error::{Result, StoreError};
use crate::notify::{ChangeCallback, ChangeRegistry};
use crate::types::{ContentPath, ListenerId, Row};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default authority for in-memory backends.
pub const DEFAULT_MEMORY_AUTHORITY: &str = "memory";

#[derive(Default)]
struct Table {
    rows: BTreeMap<String, Row>,
}

impl Table {
    fn sorted_rows(&self) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows.values().cloned().collect();
        rows.sort_by_key(|r| r.rowid);
        rows
    }
}

/// Tables held in process memory.
pub struct MemoryBackend {
    authority: String,
    tables: RwLock<HashMap<String, Table>>,
    next_rowid: AtomicU64,
    registry: ChangeRegistry,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_authority(DEFAULT_MEMORY_AUTHORITY)
    }

    pub fn with_authority(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            tables: RwLock::new(HashMap::new()),
            next_rowid: AtomicU64::new(1),
            registry: ChangeRegistry::new(),
        }
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listener_count()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn insert(&self, table: &str, key: &str, data: Vec<u8>) -> Result<Row> {
        let row = {
            let mut tables = self.tables.write();
            let entry = tables.entry(table.to_string()).or_default();
            if entry.rows.contains_key(key) {
                return Err(StoreError::DuplicateKey {
                    table: table.to_string(),
                    key: key.to_string(),
                });
            }
            let row = Row {
                rowid: self.next_rowid.fetch_add(1, Ordering::SeqCst),
                key: key.to_string(),
                data,
            };
            entry.rows.insert(key.to_string(), row.clone());
            row
        };

        self.registry.notify(&self.row_path(table, key));
        Ok(row)
    }

    fn update(&self, table: &str, key: &str, data: Vec<u8>) -> Result<bool> {
        let updated = {
            let mut tables = self.tables.write();
            match tables.get_mut(table).and_then(|t| t.rows.get_mut(key)) {
                Some(row) => {
                    row.data = data;
                    true
                }
                None => false,
            }
        };

        if updated {
            self.registry.notify(&self.row_path(table, key));
        }
        Ok(updated)
    }

    fn delete(&self, table: &str, key: &str) -> Result<usize> {
        let removed = {
            let mut tables = self.tables.write();
            tables
                .get_mut(table)
                .and_then(|t| t.rows.remove(key))
                .is_some()
        };

        if removed {
            self.registry.notify(&self.row_path(table, key));
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn delete_all(&self, table: &str) -> Result<usize> {
        let removed = {
            let mut tables = self.tables.write();
            tables.remove(table).map(|t| t.rows.len()).unwrap_or(0)
        };

        if removed > 0 {
            self.registry.notify(&self.table_path(table));
        }
        Ok(removed)
    }

    fn query(&self, table: &str, key: Option<&str>) -> Result<Vec<Row>> {
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };

        Ok(match key {
            Some(key) => t.rows.get(key).cloned().into_iter().collect(),
            None => t.sorted_rows(),
        })
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
