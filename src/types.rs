//! Core types for the keyed store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// URI scheme used for change-notification paths.
pub const CONTENT_SCHEME: &str = "content";

/// A value that can live in a [`KeyedStore`](crate::KeyedStore).
///
/// Equality is structural: two values with equal fields are the same value
/// for write deduplication and change filtering.
pub trait StoreValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Identifier of the record. Rendered with `Display` into the row key
    /// and the change-notification path, so the rendering must be stable.
    type Key: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// The key this value is stored under.
    fn key(&self) -> Self::Key;

    /// The absence marker: "no record exists for this key".
    fn none() -> Self;

    /// Whether this value is the absence marker.
    fn is_none(&self) -> bool {
        *self == Self::none()
    }
}

/// Address used for change notifications: `content://authority/table[/key]`.
///
/// A table path is the ancestor of every key path in the same table.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentPath {
    pub authority: String,
    pub table: String,
    pub key: Option<String>,
}

impl ContentPath {
    /// Path of a whole table.
    pub fn table(authority: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            table: table.into(),
            key: None,
        }
    }

    /// Path of a single row within a table.
    pub fn row(
        authority: impl Into<String>,
        table: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            table: table.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this path addresses a whole table.
    pub fn is_table(&self) -> bool {
        self.key.is_none()
    }

    /// The table path this path belongs to.
    pub fn table_path(&self) -> ContentPath {
        ContentPath::table(self.authority.clone(), self.table.clone())
    }

    /// Whether `other` is this path or lies beneath it.
    pub fn contains(&self, other: &ContentPath) -> bool {
        if self.authority != other.authority || self.table != other.table {
            return false;
        }
        match (&self.key, &other.key) {
            (None, _) => true,
            (Some(a), Some(b)) => a == b,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", CONTENT_SCHEME, self.authority, self.table)?;
        if let Some(ref key) = self.key {
            write!(f, "/{}", key)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentPath({})", self)
    }
}

/// A persisted row: encoded value bytes addressed by key within a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Assigned at insert, kept across updates. Orders bulk queries.
    pub rowid: u64,
    pub key: String,
    pub data: Vec<u8>,
}

/// Identifier of a registered change listener.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// How open subscriptions react to a deleted row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Deletes are not emitted; the subscription resumes on the next put.
    #[default]
    Silent,
    /// Deletes are emitted as the absence marker.
    EmitAbsence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_path_display() {
        let table = ContentPath::table("io.github", "repositories");
        assert_eq!(table.to_string(), "content://io.github/repositories");

        let row = ContentPath::row("io.github", "repositories", "100");
        assert_eq!(row.to_string(), "content://io.github/repositories/100");
        assert_eq!(row.table_path(), table);
    }

    #[test]
    fn test_content_path_contains() {
        let table = ContentPath::table("a", "t");
        let row = ContentPath::row("a", "t", "1");
        let other_row = ContentPath::row("a", "t", "2");
        let other_table = ContentPath::row("a", "u", "1");

        assert!(table.contains(&row));
        assert!(table.contains(&table));
        assert!(row.contains(&row));
        assert!(!row.contains(&other_row));
        assert!(!row.contains(&table));
        assert!(!table.contains(&other_table));
    }
}
