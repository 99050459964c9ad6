//! Shared fixtures for integration tests.

#![allow(dead_code)]

use keyed_store::{
    Backend, ChangeCallback, ContentPath, GitHubOwner, GitHubRepository, GitHubRepositoryStore,
    ListenerId, MemoryBackend, Result, Row, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a test waits to conclude that nothing else will be emitted.
pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn create(id: u64, name: &str) -> GitHubRepository {
    GitHubRepository::new(id, name, 10, 10, GitHubOwner::new("owner"))
}

pub fn none() -> GitHubRepository {
    use keyed_store::StoreValue;
    GitHubRepository::none()
}

pub fn memory_store() -> (Arc<MemoryBackend>, GitHubRepositoryStore) {
    init_tracing();
    let backend = Arc::new(MemoryBackend::with_authority("github"));
    let store = GitHubRepositoryStore::github_repositories(backend.clone());
    (backend, store)
}

/// Backend wrapper that counts queries and can be switched into failure.
pub struct ProbeBackend {
    inner: MemoryBackend,
    queries: AtomicUsize,
    fail_queries: AtomicBool,
    fail_writes: AtomicBool,
}

impl ProbeBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::with_authority("probe"),
            queries: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Write raw bytes straight into a table, bypassing any codec.
    pub fn insert_raw(&self, table: &str, key: &str, data: &[u8]) -> Result<Row> {
        self.inner.insert(table, key, data.to_vec())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("disk full".into()))
        } else {
            Ok(())
        }
    }
}

impl Backend for ProbeBackend {
    fn authority(&self) -> &str {
        self.inner.authority()
    }

    fn insert(&self, table: &str, key: &str, data: Vec<u8>) -> Result<Row> {
        self.check_write()?;
        self.inner.insert(table, key, data)
    }

    fn update(&self, table: &str, key: &str, data: Vec<u8>) -> Result<bool> {
        self.check_write()?;
        self.inner.update(table, key, data)
    }

    fn delete(&self, table: &str, key: &str) -> Result<usize> {
        self.check_write()?;
        self.inner.delete(table, key)
    }

    fn delete_all(&self, table: &str) -> Result<usize> {
        self.check_write()?;
        self.inner.delete_all(table)
    }

    fn query(&self, table: &str, key: Option<&str>) -> Result<Vec<Row>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection lost".into()));
        }
        self.inner.query(table, key)
    }

    fn register_change_listener(
        &self,
        path: ContentPath,
        callback: ChangeCallback,
    ) -> ListenerId {
        self.inner.register_change_listener(path, callback)
    }

    fn unregister_change_listener(&self, id: ListenerId) -> bool {
        self.inner.unregister_change_listener(id)
    }
}
