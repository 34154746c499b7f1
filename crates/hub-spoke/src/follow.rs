//! Cursor-tracked channel consumption
//!
//! A [`ChannelFollower`] is the loop a webhook or replication consumer
//! runs: read its cursor, call `next` until it catches up with stable time,
//! hand the keys on, and move the cursor forward.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use hub_core::{Clock, ContentKey, ContentPath, CursorStore, KeyError, TimeSource};

use crate::SpokeStore;

/// Smallest valid hash, so a key built from it sorts first within its millisecond
const MIN_HASH: &str = "-";

/// Follows one channel from a named cursor
pub struct ChannelFollower<S: ?Sized, K: ?Sized, C> {
    store: Arc<S>,
    cursors: Arc<K>,
    time: TimeSource<C>,
    channel: String,
    name: String,
}

impl<S, K, C> ChannelFollower<S, K, C>
where
    S: SpokeStore + ?Sized,
    K: CursorStore + ?Sized,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        cursors: Arc<K>,
        time: TimeSource<C>,
        channel: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cursors,
            time,
            channel: channel.into(),
            name: name.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Cursor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current cursor position, created at `start` if missing
    pub async fn position(&self, start: ContentPath) -> Option<ContentPath> {
        self.cursors.get(&self.name, Some(start)).await
    }

    /// Deliver up to `max` stable keys after the cursor and advance it
    pub async fn poll(&self, start: ContentPath, max: usize) -> Vec<ContentKey> {
        let Some(position) = self.position(start).await else {
            return Vec::new();
        };
        let mut current = match self.resume_after(&position).await {
            Ok(current) => current,
            Err(e) => {
                warn!(cursor = %self.name, position = %position, error = %e, "Cursor cannot be followed");
                return Vec::new();
            }
        };

        let watermark = self.time.stable();
        let mut delivered = Vec::new();
        while delivered.len() < max {
            let next = match &current {
                Some(key) => self.store.next(&self.channel, key).await,
                None => self.store.first(&self.channel).await,
            };
            let Some(next) = next else {
                break;
            };
            if next.time() >= watermark {
                break;
            }
            delivered.push(next.clone());
            current = Some(next);
        }

        if let Some(last) = delivered.last() {
            self.cursors
                .update_increase(&self.name, ContentPath::Key(last.clone()))
                .await;
            debug!(cursor = %self.name, delivered = delivered.len(), last = %last, "Advanced cursor");
        }
        delivered
    }

    /// The stored key after which `position` resumes, `None` to start from the first key
    ///
    /// A bucket position resumes at the first key stamped at or after the
    /// bucket's end, whatever the hashes written inside it.
    async fn resume_after(&self, position: &ContentPath) -> Result<Option<ContentKey>, KeyError> {
        match position {
            ContentPath::Key(key) => Ok(Some(key.clone())),
            ContentPath::Bucket(bucket) => {
                let edge = ContentKey::new(bucket.end(), MIN_HASH)?;
                Ok(self.store.previous(&self.channel, &edge).await)
            }
        }
    }

    /// Poll forever, passing each batch to `deliver`
    ///
    /// Sleeps `idle` on the injected clock whenever the cursor is caught up.
    pub async fn follow<F>(&self, start: ContentPath, batch: usize, idle: Duration, mut deliver: F)
    where
        F: FnMut(Vec<ContentKey>) -> bool,
    {
        info!(channel = %self.channel, cursor = %self.name, "Following channel");
        loop {
            let keys = self.poll(start.clone(), batch).await;
            if keys.is_empty() {
                self.time.sleep(idle).await;
                continue;
            }
            if !deliver(keys) {
                info!(cursor = %self.name, "Follower stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySpokeStore;
    use chrono::{DateTime, Utc};
    use hub_core::{InMemoryCursorStore, ManualClock};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn path(s: &str) -> ContentPath {
        s.parse().unwrap()
    }

    type TestFollower = ChannelFollower<InMemorySpokeStore, InMemoryCursorStore, ManualClock>;

    async fn create_test_follower(now: &str, keys: &[&str]) -> (TestFollower, Arc<InMemoryCursorStore>, ManualClock) {
        let store = Arc::new(InMemorySpokeStore::new());
        for k in keys {
            store.write("flights", &k.parse::<ContentKey>().unwrap(), b"x").await.unwrap();
        }
        let cursors = Arc::new(InMemoryCursorStore::new());
        let clock = ManualClock::new(at(now));
        let follower = ChannelFollower::new(
            store,
            cursors.clone(),
            TimeSource::new(clock.clone()),
            "flights",
            "webhook",
        );
        (follower, cursors, clock)
    }

    #[tokio::test]
    async fn test_poll_advances_cursor() {
        let (follower, cursors, _clock) = create_test_follower(
            "2014-11-18T01:00:00Z",
            &[
                "2014/11/18/00/57/24/015/a",
                "2014/11/18/00/57/24/015/b",
                "2014/11/18/00/58/00/000/c",
            ],
        )
        .await;
        let start = path("2014/11/18/00/57/24/015/a");

        let first = follower.poll(start.clone(), 1).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].hash(), "b");

        let rest = follower.poll(start.clone(), 10).await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].hash(), "c");
        assert!(follower.poll(start, 10).await.is_empty());

        assert_eq!(
            cursors.get("webhook", None).await,
            Some(path("2014/11/18/00/58/00/000/c"))
        );
    }

    #[tokio::test]
    async fn test_poll_stops_at_stable_time() {
        let (follower, _cursors, clock) = create_test_follower(
            "2014-11-18T00:58:03Z",
            &["2014/11/18/00/57/00/000/a", "2014/11/18/00/58/00/000/b"],
        )
        .await;
        let start = path("2014/11/18/00/56");

        let keys = follower.poll(start.clone(), 10).await;
        assert_eq!(keys.len(), 1);

        clock.advance(Duration::from_secs(5));
        let keys = follower.poll(start, 10).await;
        assert_eq!(keys[0].hash(), "b");
    }

    #[tokio::test]
    async fn test_bucket_cursor_resumes_after_bucket() {
        let (follower, _cursors, _clock) = create_test_follower(
            "2014-11-18T01:00:00Z",
            &["2014/11/18/00/57/59/999/zz", "2014/11/18/00/58/00/000/a"],
        )
        .await;

        let keys = follower.poll(path("2014/11/18/00/57"), 10).await;
        let hashes: Vec<_> = keys.iter().map(|k| k.hash().to_string()).collect();
        assert_eq!(hashes, ["a"]);
    }

    #[tokio::test]
    async fn test_bucket_cursor_ignores_hash_length() {
        let (follower, _cursors, _clock) = create_test_follower(
            "2014-11-18T01:00:00Z",
            &[
                "2014/11/18/00/57/00/000/a",
                "2014/11/18/00/57/59/999/zzzzzzzzzzzzzzzzz",
                "2014/11/18/00/58/00/000/-",
                "2014/11/18/00/58/00/000/b",
            ],
        )
        .await;

        let keys = follower.poll(path("2014/11/18/00/57"), 10).await;
        let hashes: Vec<_> = keys.iter().map(|k| k.hash().to_string()).collect();
        assert_eq!(hashes, ["-", "b"]);
    }

    #[tokio::test]
    async fn test_bucket_cursor_before_all_keys_starts_at_first() {
        let (follower, _cursors, _clock) = create_test_follower(
            "2014-11-18T01:00:00Z",
            &["2014/11/18/00/57/00/000/a"],
        )
        .await;

        let keys = follower.poll(path("2014/11/17"), 10).await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].hash(), "a");
    }

    #[tokio::test]
    async fn test_follow_delivers_until_stopped() {
        let (follower, _cursors, _clock) = create_test_follower(
            "2014-11-18T01:00:00Z",
            &["2014/11/18/00/57/00/000/a", "2014/11/18/00/58/00/000/b"],
        )
        .await;

        let mut seen = Vec::new();
        follower
            .follow(path("2014/11/18/00/56"), 1, Duration::from_secs(1), |keys| {
                seen.extend(keys);
                seen.len() < 2
            })
            .await;
        assert_eq!(seen.len(), 2);
    }
}
