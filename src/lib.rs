//! # Keyed Store
//!
//! A persistent, keyed record cache with deduplicated writes and live
//! per-key subscriptions.
//!
//! ## Core Concepts
//!
//! - **Backends**: Tables of encoded rows with change notification
//! - **Codecs**: Turn values into row bytes and back
//! - **Stores**: Upsert with dedup, delete, one-shot reads
//! - **Live queries**: Snapshot at creation, then every distinct change
//!
//! ## Example
//!
//! ```ignore
//! use keyed_store::{FileBackend, FileBackendConfig, GitHubOwner, GitHubRepository,
//!     GitHubRepositoryStore};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(FileBackend::open_or_create(FileBackendConfig {
//!     path: "./cache".into(),
//!     ..Default::default()
//! })?);
//! let store = GitHubRepositoryStore::github_repositories(backend);
//!
//! let live = store.get_once_and_stream(&100)?.subscribe();
//! store.put(&GitHubRepository::new(100, "repository1", 10, 10, GitHubOwner::new("owner")))?;
//!
//! assert!(live.recv()?.is_none());
//! assert_eq!(live.recv()?.name, "repository1");
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod github;
pub mod notify;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backend::{Backend, FileBackend, FileBackendConfig, MemoryBackend};
pub use codec::{Codec, JsonCodec, MessagePackCodec};
pub use error::{Result, StoreError};
pub use github::{GitHubOwner, GitHubRepository, GitHubRepositoryStore, GITHUB_REPOSITORIES_TABLE};
pub use notify::{ChangeCallback, ChangeRegistry};
pub use store::{KeyedStore, StoreConfig};
pub use subscriptions::{LiveQuery, Subscription};
pub use types::*;
