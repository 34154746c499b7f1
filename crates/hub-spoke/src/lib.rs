//! # Hub Spoke
//!
//! Short-term storage for the content hub. Every item of every channel is
//! kept as one file under a time hierarchy for a bounded retention window,
//! and navigation (next, previous, first, last) is answered by walking that
//! hierarchy directly. There is no index.
//!
//! ## Layers
//!
//! - [`SpokeStore`]: the storage trait, implemented by [`FileSpokeStore`]
//!   and [`InMemorySpokeStore`]
//! - [`SpokeContentDao`]: content encoding, stable-time aware navigation and
//!   multi-bucket range queries over a store
//! - [`TtlEnforcer`]: periodic retention sweeps
//! - [`ChannelFollower`]: cursor-tracked consumption of a channel
//!
//! ## Example
//!
//! ```ignore
//! use hub_spoke::{FileSpokeStore, FileSpokeStoreConfig, SpokeStore};
//!
//! let store = FileSpokeStore::open(FileSpokeStoreConfig::new("/data/spoke")).await?;
//! store.write("flights", &key, b"payload").await?;
//! let after = store.next("flights", &key).await;
//! ```

pub mod content;
pub mod dao;
pub mod error;
pub mod follow;
pub mod layout;
pub mod memory;
pub mod persistent;
pub mod ttl;

pub use content::Content;
pub use dao::SpokeContentDao;
pub use error::StorageError;
pub use follow::ChannelFollower;
pub use memory::InMemorySpokeStore;
pub use persistent::{FileSpokeStore, FileSpokeStoreConfig};
pub use ttl::{SweepReport, SweeperState, TtlConfig, TtlEnforcer};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use hub_core::{ContentKey, TimeBucket};

/// Channel-partitioned item storage with key-order navigation
///
/// Write and delete failures are returned. Read-side failures are logged by
/// the implementation and surface as absence, so a caller walking a channel
/// sees a damaged item the same way as a missing one.
#[async_trait]
pub trait SpokeStore: Send + Sync {
    /// Store `payload` under `key`, replacing any existing item
    async fn write(&self, channel: &str, key: &ContentKey, payload: &[u8])
    -> Result<(), StorageError>;

    /// Payload stored under `key`
    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Bytes>;

    /// Remove every item in `bucket`, or the whole channel for `None`
    ///
    /// Returns the number of items removed. Removing something that does
    /// not exist is not an error.
    async fn delete(&self, channel: &str, bucket: Option<&TimeBucket>) -> Result<u64, StorageError>;

    /// Smallest stored key strictly after `key`
    ///
    /// `key` itself does not need to be stored.
    async fn next(&self, channel: &str, key: &ContentKey) -> Option<ContentKey>;

    /// Largest stored key strictly before `key`
    async fn previous(&self, channel: &str, key: &ContentKey) -> Option<ContentKey>;

    /// Oldest stored key
    async fn first(&self, channel: &str) -> Option<ContentKey>;

    /// Newest stored key
    async fn last(&self, channel: &str) -> Option<ContentKey>;

    /// Keys in `bucket` (or the whole channel), ascending
    async fn keys_in_bucket(&self, channel: &str, bucket: Option<&TimeBucket>) -> Vec<ContentKey>;

    /// Largest buckets ending at or before `cutoff` that hold anything
    ///
    /// Used by age-based retention, ascending by start time.
    async fn expired_buckets(&self, channel: &str, cutoff: DateTime<Utc>) -> Vec<TimeBucket>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the SpokeStore trait is object-safe
    fn _assert_object_safe(_: &dyn SpokeStore) {}
}
