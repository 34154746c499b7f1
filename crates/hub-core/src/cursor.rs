//! Persistence of consumer progress
//!
//! Webhook and replication consumers record the last [`ContentPath`] they
//! processed under a name. Updates are compare-and-swap on a version token,
//! so several nodes racing to advance the same cursor never move it
//! backwards.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::path::ContentPath;

/// A value tagged with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Named cursor storage with version-checked updates
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Create the cursor with `default` unless it already exists
    async fn initialize(&self, name: &str, default: ContentPath);

    /// Current value and version
    async fn get_versioned(&self, name: &str) -> Option<Versioned<ContentPath>>;

    /// Replace the value if the stored version still equals `expected_version`
    async fn compare_and_set(&self, name: &str, path: ContentPath, expected_version: u64) -> bool;

    async fn delete(&self, name: &str);

    /// Names of all cursors
    async fn names(&self) -> Vec<String>;

    /// Current value, creating the cursor with `default` when missing
    async fn get(&self, name: &str, default: Option<ContentPath>) -> Option<ContentPath> {
        if let Some(current) = self.get_versioned(name).await {
            return Some(current.value);
        }
        let default = default?;
        warn!(cursor = name, "Missing cursor, initializing");
        self.initialize(name, default.clone()).await;
        Some(self.get_versioned(name).await.map_or(default, |v| v.value))
    }

    /// Set the value once, giving up if another writer got there first
    async fn update(&self, name: &str, path: ContentPath) {
        match self.get_versioned(name).await {
            Some(existing) => {
                if !self.compare_and_set(name, path, existing.version).await {
                    debug!(cursor = name, "Lost cursor update race");
                }
            }
            None => {
                info!(cursor = name, "Cursor does not exist, creating");
                self.initialize(name, path).await;
            }
        }
    }

    /// Move the cursor forward to `path`; never moves it backwards
    ///
    /// Progress is judged by [`ContentPath::cmp_progress`], so a bucket
    /// checkpoint is ahead of every key inside the bucket.
    async fn update_increase(&self, name: &str, path: ContentPath) {
        loop {
            let Some(existing) = self.get_versioned(name).await else {
                info!(cursor = name, "Cursor does not exist, creating");
                self.initialize(name, path).await;
                return;
            };
            if path.cmp_progress(&existing.value).is_le() {
                return;
            }
            if self
                .compare_and_set(name, path.clone(), existing.version)
                .await
            {
                return;
            }
        }
    }
}

/// In-process cursor store
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<String, Versioned<ContentPath>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn initialize(&self, name: &str, default: ContentPath) {
        self.cursors
            .entry(name.to_string())
            .or_insert(Versioned {
                value: default,
                version: 0,
            });
    }

    async fn get_versioned(&self, name: &str) -> Option<Versioned<ContentPath>> {
        self.cursors.get(name).map(|e| e.value().clone())
    }

    async fn compare_and_set(&self, name: &str, path: ContentPath, expected_version: u64) -> bool {
        match self.cursors.get_mut(name) {
            Some(mut entry) if entry.version == expected_version => {
                entry.value = path;
                entry.version += 1;
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    async fn delete(&self, name: &str) {
        if self.cursors.remove(name).is_none() {
            info!(cursor = name, "No cursor to delete");
        }
    }

    async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.cursors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ContentPath {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_get_initializes_default() {
        let store = InMemoryCursorStore::new();
        assert!(store.get("hook", None).await.is_none());

        let default = path("2014/11/18/00/57");
        assert_eq!(store.get("hook", Some(default.clone())).await, Some(default.clone()));
        assert_eq!(store.names().await, ["hook"]);

        // existing value wins over a new default
        let other = path("2015/01/01/00/00");
        assert_eq!(store.get("hook", Some(other)).await, Some(default));
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_version() {
        let store = InMemoryCursorStore::new();
        store.initialize("hook", path("2014/11/18/00/57")).await;

        assert!(store.compare_and_set("hook", path("2014/11/18/00/58"), 0).await);
        assert!(!store.compare_and_set("hook", path("2014/11/18/00/59"), 0).await);

        let current = store.get_versioned("hook").await.unwrap();
        assert_eq!(current.version, 1);
        assert_eq!(current.value, path("2014/11/18/00/58"));
    }

    #[tokio::test]
    async fn test_update_increase_only_moves_forward() {
        let store = InMemoryCursorStore::new();
        store
            .update_increase("hook", path("2014/11/18/00/57/24/015/b"))
            .await;
        store
            .update_increase("hook", path("2014/11/18/00/57/24/015/a"))
            .await;
        assert_eq!(
            store.get("hook", None).await,
            Some(path("2014/11/18/00/57/24/015/b"))
        );

        store.update_increase("hook", path("2014/11/18/00/57")).await;
        assert_eq!(store.get("hook", None).await, Some(path("2014/11/18/00/57")));

        // a key inside the checkpointed bucket is behind it
        store
            .update_increase("hook", path("2014/11/18/00/57/59/999/zzzzzzzzzzzzzzzzzz"))
            .await;
        assert_eq!(store.get("hook", None).await, Some(path("2014/11/18/00/57")));

        // the enclosing hour ends later, so it is ahead
        store.update_increase("hook", path("2014/11/18/00")).await;
        assert_eq!(store.get("hook", None).await, Some(path("2014/11/18/00")));
    }

    #[tokio::test]
    async fn test_update_can_move_backwards() {
        let store = InMemoryCursorStore::new();
        store.update("hook", path("2014/11/18/00/58")).await;
        store.update("hook", path("2014/11/18/00/57")).await;
        assert_eq!(store.get("hook", None).await, Some(path("2014/11/18/00/57")));

        store.delete("hook").await;
        assert!(store.names().await.is_empty());
    }
}
