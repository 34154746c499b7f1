//! In-memory spoke store
//!
//! Keeps every channel in an ordered map. Suitable for tests and for
//! running the node without a disk.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use hub_core::{ContentKey, TimeBucket, TimeUnit, validate_channel_name};

use crate::SpokeStore;
use crate::error::StorageError;

/// Units tried, coarsest first, when grouping expired keys
const EXPIRY_UNITS: [TimeUnit; 4] = [
    TimeUnit::Months,
    TimeUnit::Days,
    TimeUnit::Hours,
    TimeUnit::Minutes,
];

/// In-memory implementation of [`SpokeStore`]
#[derive(Debug, Default)]
pub struct InMemorySpokeStore {
    /// Items per channel, ordered by key
    channels: DashMap<String, BTreeMap<ContentKey, Bytes>>,
}

impl InMemorySpokeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items held in `channel`
    pub fn len(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |items| items.len())
    }

    /// Whether no channel holds anything
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|items| items.is_empty())
    }
}

#[async_trait]
impl SpokeStore for InMemorySpokeStore {
    async fn write(
        &self,
        channel: &str,
        key: &ContentKey,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        validate_channel_name(channel).map_err(|_| StorageError::InvalidChannel(channel.to_string()))?;
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(key.clone(), Bytes::copy_from_slice(payload));
        trace!(channel, key = %key, bytes = payload.len(), "Stored item");
        Ok(())
    }

    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Bytes> {
        let item = self.channels.get(channel)?.get(key).cloned();
        if item.is_none() {
            debug!(channel, key = %key, "Item not found");
        }
        item
    }

    async fn delete(&self, channel: &str, bucket: Option<&TimeBucket>) -> Result<u64, StorageError> {
        validate_channel_name(channel).map_err(|_| StorageError::InvalidChannel(channel.to_string()))?;
        let Some(bucket) = bucket else {
            let removed = self
                .channels
                .remove(channel)
                .map_or(0, |(_, items)| items.len() as u64);
            return Ok(removed);
        };

        let Some(mut items) = self.channels.get_mut(channel) else {
            return Ok(0);
        };
        let before = items.len();
        items.retain(|key, _| !bucket.contains(key.time()));
        Ok((before - items.len()) as u64)
    }

    async fn next(&self, channel: &str, key: &ContentKey) -> Option<ContentKey> {
        let items = self.channels.get(channel)?;
        items
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    async fn previous(&self, channel: &str, key: &ContentKey) -> Option<ContentKey> {
        let items = self.channels.get(channel)?;
        items.range(..key).next_back().map(|(k, _)| k.clone())
    }

    async fn first(&self, channel: &str) -> Option<ContentKey> {
        let items = self.channels.get(channel)?;
        items.keys().next().cloned()
    }

    async fn last(&self, channel: &str) -> Option<ContentKey> {
        let items = self.channels.get(channel)?;
        items.keys().next_back().cloned()
    }

    async fn keys_in_bucket(&self, channel: &str, bucket: Option<&TimeBucket>) -> Vec<ContentKey> {
        let Some(items) = self.channels.get(channel) else {
            return Vec::new();
        };
        items
            .keys()
            .filter(|key| bucket.is_none_or(|b| b.contains(key.time())))
            .cloned()
            .collect()
    }

    async fn expired_buckets(&self, channel: &str, cutoff: DateTime<Utc>) -> Vec<TimeBucket> {
        let Some(items) = self.channels.get(channel) else {
            return Vec::new();
        };
        let mut buckets: Vec<TimeBucket> = items
            .keys()
            .take_while(|key| key.time() < cutoff)
            .filter_map(|key| {
                EXPIRY_UNITS
                    .iter()
                    .map(|&unit| key.bucket(unit))
                    .find(|bucket| bucket.end() <= cutoff)
            })
            .collect();
        buckets.dedup();
        if buckets.is_empty() {
            trace!(channel, cutoff = %cutoff, "Nothing expired");
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ContentKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let store = InMemorySpokeStore::new();
        let k = key("2014/11/18/00/57/24/015/a");
        store.write("flights", &k, b"x").await.unwrap();
        assert_eq!(store.read("flights", &k).await, Some(Bytes::from_static(b"x")));
        assert_eq!(store.len("flights"), 1);

        let minute: TimeBucket = "2014/11/18/00/57".parse().unwrap();
        assert_eq!(store.delete("flights", Some(&minute)).await.unwrap(), 1);
        assert!(store.read("flights", &k).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_channel() {
        let store = InMemorySpokeStore::new();
        let k = key("2014/11/18/00/57/24/015/a");
        assert!(matches!(
            store.write("a/b", &k, b"x").await,
            Err(StorageError::InvalidChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_buckets_groups_coarsest() {
        let store = InMemorySpokeStore::new();
        for k in [
            "2014/10/31/23/59/00/000/a",
            "2014/10/31/23/59/30/000/b",
            "2014/11/18/00/57/24/015/c",
            "2014/11/18/01/10/00/000/d",
            "2014/11/18/01/30/00/000/e",
        ] {
            store.write("flights", &key(k), b"x").await.unwrap();
        }
        let cutoff = DateTime::parse_from_rfc3339("2014-11-18T01:20:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let urls: Vec<_> = store
            .expired_buckets("flights", cutoff)
            .await
            .iter()
            .map(TimeBucket::url)
            .collect();
        assert_eq!(urls, ["2014/10", "2014/11/18/00", "2014/11/18/01/10"]);
    }
}
