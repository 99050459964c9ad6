//! Durable table backends.
//!
//! A backend stores encoded rows in named tables, addressed by string key,
//! and announces every committed mutation through change listeners keyed on
//! [`ContentPath`]. Notifications are dispatched after the backend has
//! released its own locks and before the mutating call returns.
//!
//! Two implementations ship with the crate:
//! - [`MemoryBackend`]: in-process tables, lost on drop
//! - [`FileBackend`]: CRC-checked operation log replayed on open

mod file;
mod log;
mod memory;

pub use file::{FileBackend, FileBackendConfig};
pub use memory::MemoryBackend;

use crate::error::Result;
use crate::notify::ChangeCallback;
use crate::types::{ContentPath, ListenerId, Row};

/// Table storage with change notification.
pub trait Backend: Send + Sync + 'static {
    /// Authority component of every path this backend notifies on.
    fn authority(&self) -> &str;

    /// Insert a new row. Fails with `DuplicateKey` if the key exists.
    fn insert(&self, table: &str, key: &str, data: Vec<u8>) -> Result<Row>;

    /// Replace the data of an existing row. Returns false if no row matched.
    fn update(&self, table: &str, key: &str, data: Vec<u8>) -> Result<bool>;

    /// Delete a row. Returns the number of rows removed (0 or 1).
    fn delete(&self, table: &str, key: &str) -> Result<usize>;

    /// Delete every row of a table. Returns the number of rows removed.
    fn delete_all(&self, table: &str) -> Result<usize>;

    /// Rows of a table in insertion order, optionally filtered to one key.
    fn query(&self, table: &str, key: Option<&str>) -> Result<Vec<Row>>;

    /// Register a callback for mutations at or beneath `path`.
    fn register_change_listener(&self, path: ContentPath, callback: ChangeCallback)
        -> ListenerId;

    /// Remove a change listener. Returns false if it was not registered.
    fn unregister_change_listener(&self, id: ListenerId) -> bool;

    /// Path of a single row.
    fn row_path(&self, table: &str, key: &str) -> ContentPath {
        ContentPath::row(self.authority(), table, key)
    }

    /// Path of a whole table.
    fn table_path(&self, table: &str) -> ContentPath {
        ContentPath::table(self.authority(), table)
    }
}
