//! GitHub repository records and their store.

use crate::backend::Backend;
use crate::store::{KeyedStore, StoreConfig};
use crate::types::{DeletePolicy, StoreValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Backend table holding repository rows.
pub const GITHUB_REPOSITORIES_TABLE: &str = "github_repositories";

/// GitHub user or organization owning a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GitHubOwner {
    pub login: String,
}

impl GitHubOwner {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
        }
    }
}

/// Cached GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GitHubRepository {
    pub id: u64,
    pub name: String,
    pub stargazers_count: u32,
    pub forks_count: u32,
    pub owner: GitHubOwner,
}

impl GitHubRepository {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        stargazers_count: u32,
        forks_count: u32,
        owner: GitHubOwner,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            stargazers_count,
            forks_count,
            owner,
        }
    }
}

impl StoreValue for GitHubRepository {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }

    /// Id 0 is never assigned by GitHub.
    fn none() -> Self {
        Self::default()
    }
}

/// Store of GitHub repositories keyed by repository id.
pub type GitHubRepositoryStore = KeyedStore<GitHubRepository>;

impl KeyedStore<GitHubRepository> {
    /// Repository store over `backend` with JSON rows.
    pub fn github_repositories(backend: Arc<dyn Backend>) -> Self {
        Self::with_json(
            backend,
            StoreConfig {
                table: GITHUB_REPOSITORIES_TABLE.to_string(),
                delete_policy: DeletePolicy::Silent,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonCodec};

    #[test]
    fn test_none_marker() {
        let none = GitHubRepository::none();
        assert!(none.is_none());
        assert_eq!(none.id, 0);
        assert!(!GitHubRepository::new(1, "a", 0, 0, GitHubOwner::new("o")).is_none());
    }

    #[test]
    fn test_row_format() {
        let codec = JsonCodec::<GitHubRepository>::new();
        let repo = GitHubRepository::new(100, "repository1", 10, 10, GitHubOwner::new("owner"));

        let json: serde_json::Value = serde_json::from_slice(&codec.encode(&repo).unwrap()).unwrap();
        assert_eq!(json["id"], 100);
        assert_eq!(json["stargazers_count"], 10);
        assert_eq!(json["owner"]["login"], "owner");
    }
}
