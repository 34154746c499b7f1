//! Content access over a spoke store
//!
//! [`SpokeContentDao`] is what request handlers talk to. It mints keys,
//! encodes items, hides not-yet-stable writes and answers directional
//! queries that span several hour buckets.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};

use hub_core::{
    Clock, ContentKey, Direction, KeyRangeFilter, RangeQuery, TimeBucket, TimeSource, TimeUnit,
};

use crate::SpokeStore;
use crate::content::Content;
use crate::error::StorageError;

/// Item-level access to a [`SpokeStore`]
pub struct SpokeContentDao<S: ?Sized, C> {
    store: Arc<S>,
    filter: KeyRangeFilter<C>,
}

impl<S: SpokeStore + ?Sized, C: Clock> SpokeContentDao<S, C> {
    pub fn new(store: Arc<S>, time: TimeSource<C>) -> Self {
        Self {
            store,
            filter: KeyRangeFilter::new(time),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn time(&self) -> &TimeSource<C> {
        self.filter.time()
    }

    /// Store `content` under a freshly minted key
    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn insert(&self, channel: &str, content: &Content) -> Result<ContentKey, StorageError> {
        let key = ContentKey::at(self.time().now())?;
        self.store.write(channel, &key, &content.encode()?).await?;
        debug!(key = %key, "Inserted item");
        Ok(key)
    }

    /// Store `content` under a caller-chosen key, marking it historical
    #[instrument(skip(self, key, content), fields(key = %key))]
    pub async fn insert_historical(
        &self,
        channel: &str,
        key: &ContentKey,
        content: Content,
    ) -> Result<(), StorageError> {
        let content = Content {
            historical: true,
            ..content
        };
        self.store.write(channel, key, &content.encode()?).await
    }

    pub async fn get(&self, channel: &str, key: &ContentKey) -> Option<Content> {
        let bytes = self.store.read(channel, key).await?;
        match Content::decode(&bytes) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(channel, key = %key, error = %e, "Unable to decode item");
                None
            }
        }
    }

    /// Remove every item of `channel`
    pub async fn delete_channel(&self, channel: &str) -> Result<u64, StorageError> {
        let removed = self.store.delete(channel, None).await?;
        debug!(channel, removed, "Deleted channel");
        Ok(removed)
    }

    /// Newest key, optionally restricted to keys before stable time
    pub async fn latest(&self, channel: &str, stable: bool) -> Option<ContentKey> {
        let mut candidate = self.store.last(channel).await?;
        if stable {
            let watermark = self.time().stable();
            while candidate.time() >= watermark {
                candidate = self.store.previous(channel, &candidate).await?;
            }
        }
        Some(candidate)
    }

    /// Oldest key not older than `ttl_cutoff`
    pub async fn earliest(&self, channel: &str, ttl_cutoff: DateTime<Utc>) -> Option<ContentKey> {
        let mut candidate = self.store.first(channel).await?;
        while candidate.time() < ttl_cutoff {
            candidate = self.store.next(channel, &candidate).await?;
        }
        Some(candidate)
    }

    /// All keys in `bucket`
    pub async fn query_by_time(
        &self,
        channel: &str,
        bucket: &TimeBucket,
        stable: bool,
    ) -> BTreeSet<ContentKey> {
        let watermark = stable.then(|| self.time().stable());
        self.store
            .keys_in_bucket(channel, Some(bucket))
            .await
            .into_iter()
            .filter(|key| watermark.is_none_or(|w| key.time() < w))
            .collect()
    }

    /// Up to `query.count` keys after (or before) `query.limit`
    ///
    /// Walks hour buckets outward from the limit until enough keys pass the
    /// filter or the channel's stored extent is exhausted.
    #[instrument(skip(self, query), fields(limit = %query.limit, direction = %query.direction, count = query.count))]
    pub async fn query_direction(&self, channel: &str, query: &RangeQuery) -> BTreeSet<ContentKey> {
        if query.count == 0 {
            return BTreeSet::new();
        }
        let (Some(first), Some(last)) = (
            self.store.first(channel).await,
            self.store.last(channel).await,
        ) else {
            return BTreeSet::new();
        };

        let floor = first.time().max(query.ttl_cutoff);
        let start = match query.direction {
            Direction::Next => query.limit.time().max(floor),
            Direction::Previous => query.limit.time().min(last.time()),
        };
        let mut bucket = TimeBucket::new(TimeUnit::Hours, start);
        let mut candidates = Vec::new();
        let mut hops = 0usize;

        loop {
            candidates.extend(self.store.keys_in_bucket(channel, Some(&bucket)).await);
            hops += 1;
            let result = self.filter.filter(candidates.iter().cloned(), query);

            let exhausted = match query.direction {
                Direction::Next => bucket.end() > last.time(),
                Direction::Previous => bucket.start() <= floor,
            };
            if result.len() >= query.count || exhausted {
                trace!(hops, found = result.len(), "Resolved directional query");
                return result;
            }

            let following = match query.direction {
                Direction::Next => bucket.next(),
                Direction::Previous => bucket.previous(),
            };
            match following {
                Some(following) => bucket = following,
                None => return result,
            }
        }
    }

    /// The oldest stored key across `channels`
    pub async fn oldest_item(&self, channels: &[String]) -> Option<(String, ContentKey)> {
        let mut oldest: Option<(String, ContentKey)> = None;
        for channel in channels {
            if let Some(key) = self.store.first(channel).await
                && oldest.as_ref().is_none_or(|(_, current)| key < *current)
            {
                oldest = Some((channel.clone(), key));
            }
        }
        oldest
    }
}
