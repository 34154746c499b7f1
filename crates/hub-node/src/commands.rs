//! Operations behind each CLI subcommand

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::info;

use hub_core::channel::DEFAULT_TTL_MINUTES;
use hub_core::{
    ChannelConfig, ChannelRegistry, Clock, ContentKey, ContentPath, Direction,
    InMemoryCursorStore, RangeQuery, StaticChannelRegistry, TimeBucket, TimeSource, TimeUnit,
};
use hub_spoke::{
    ChannelFollower, Content, FileSpokeStore, SpokeContentDao, SpokeStore, SweepReport, TtlConfig,
    TtlEnforcer,
};

use crate::config::NodeConfig;

/// An opened spoke store plus the services built on it
pub struct Node<C> {
    store: Arc<FileSpokeStore>,
    channels: Arc<StaticChannelRegistry>,
    dao: SpokeContentDao<FileSpokeStore, C>,
    ttl: TtlConfig,
}

impl<C: Clock + Clone + 'static> Node<C> {
    pub async fn open(config: &NodeConfig, clock: C) -> Result<Self> {
        let store = Arc::new(FileSpokeStore::open(config.store_config()).await?);
        let channels = Arc::new(StaticChannelRegistry::from_configs(config.channels.clone()));
        let time = TimeSource::new(clock).with_stable_lag(config.stable_lag());
        Ok(Self {
            dao: SpokeContentDao::new(store.clone(), time),
            store,
            channels,
            ttl: config.sweep.ttl_config(),
        })
    }

    fn time(&self) -> &TimeSource<C> {
        self.dao.time()
    }

    /// Retention settings, falling back to a live channel with the default TTL
    async fn channel(&self, name: &str) -> Result<ChannelConfig> {
        match self.channels.get(name).await {
            Some(config) => Ok(config),
            None => Ok(ChannelConfig::new(name, DEFAULT_TTL_MINUTES)?),
        }
    }

    /// Oldest instant still inside the channel's retention window
    async fn ttl_cutoff(&self, channel: &str) -> Result<DateTime<Utc>> {
        let ttl_minutes = self.channel(channel).await?.ttl_minutes;
        let window = i64::try_from(ttl_minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX);
        Ok(self
            .time()
            .now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    /// Store `content`, under `key` when given
    pub async fn put(
        &self,
        channel: &str,
        content: Content,
        key: Option<ContentKey>,
    ) -> Result<ContentKey> {
        match key {
            Some(key) => {
                self.dao.insert_historical(channel, &key, content).await?;
                Ok(key)
            }
            None => Ok(self.dao.insert(channel, &content).await?),
        }
    }

    pub async fn get(&self, channel: &str, key: &ContentKey) -> Result<Content> {
        self.dao
            .get(channel, key)
            .await
            .ok_or_else(|| anyhow!("{channel}/{key} not found"))
    }

    /// Up to `count` keys after or before `key`, in ascending order
    pub async fn step(
        &self,
        channel: &str,
        key: ContentKey,
        direction: Direction,
        count: usize,
        stable: bool,
    ) -> Result<BTreeSet<ContentKey>> {
        let query = RangeQuery::new(key, direction, count)
            .with_ttl_cutoff(self.ttl_cutoff(channel).await?)
            .with_stable(stable);
        Ok(self.dao.query_direction(channel, &query).await)
    }

    pub async fn latest(&self, channel: &str, stable: bool) -> Option<ContentKey> {
        self.dao.latest(channel, stable).await
    }

    pub async fn earliest(&self, channel: &str) -> Result<Option<ContentKey>> {
        let cutoff = self.ttl_cutoff(channel).await?;
        Ok(self.dao.earliest(channel, cutoff).await)
    }

    /// Keys in `bucket`, or in the whole channel
    pub async fn list(
        &self,
        channel: &str,
        bucket: Option<&TimeBucket>,
        stable: bool,
    ) -> BTreeSet<ContentKey> {
        match bucket {
            Some(bucket) => self.dao.query_by_time(channel, bucket, stable).await,
            None => {
                let watermark = stable.then(|| self.time().stable());
                self.store
                    .keys_in_bucket(channel, None)
                    .await
                    .into_iter()
                    .filter(|key| watermark.is_none_or(|w| key.time() < w))
                    .collect()
            }
        }
    }

    fn enforcer(&self) -> TtlEnforcer<FileSpokeStore, StaticChannelRegistry, C> {
        TtlEnforcer::new(
            self.store.clone(),
            self.channels.clone(),
            self.time().clone(),
            self.ttl.clone(),
        )
    }

    /// One retention cycle over every configured channel
    pub async fn sweep(&self) -> SweepReport {
        self.enforcer().sweep_once().await
    }

    /// Run the sweeper until `shutdown` resolves
    pub async fn serve(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            storage_path = %self.store.root().display(),
            channels = self.channels.len(),
            "Spoke node started"
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let sweeper = self.enforcer().spawn(shutdown_rx);

        shutdown.await;
        info!("Shutdown requested");
        // the sweeper may already have exited when disabled
        let _ = shutdown_tx.send(());
        sweeper.await?;
        info!("Spoke node stopped");
        Ok(())
    }

    /// Deliver stable keys from `start` onward until `deliver` returns false
    pub async fn follow<F>(
        &self,
        channel: &str,
        cursor: &str,
        start: Option<ContentPath>,
        batch: usize,
        idle: Duration,
        deliver: F,
    ) where
        F: FnMut(Vec<ContentKey>) -> bool,
    {
        let start = start.unwrap_or_else(|| {
            ContentPath::Bucket(TimeBucket::new(TimeUnit::Minutes, self.time().stable()))
        });
        let follower = ChannelFollower::new(
            self.store.clone(),
            Arc::new(InMemoryCursorStore::new()),
            self.time().clone(),
            channel,
            cursor,
        );
        follower.follow(start, batch, idle, deliver).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::ManualClock;
    use tempfile::TempDir;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn key(s: &str) -> ContentKey {
        s.parse().unwrap()
    }

    async fn create_test_node(now: &str) -> (Node<ManualClock>, ManualClock, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = NodeConfig {
            storage_path: temp_dir.path().to_path_buf(),
            sync_writes: false,
            channels: vec![ChannelConfig::new("flights", 60).unwrap()],
            ..NodeConfig::default()
        };
        let clock = ManualClock::new(at(now));
        let node = Node::open(&config, clock.clone()).await.unwrap();
        (node, clock, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (node, _clock, _temp_dir) = create_test_node("2014-11-18T01:00:00Z").await;

        let minted = node
            .put("flights", Content::new("hello").with_content_type("text/plain"), None)
            .await
            .unwrap();
        assert_eq!(minted.time(), at("2014-11-18T01:00:00Z"));

        let content = node.get("flights", &minted).await.unwrap();
        assert_eq!(content.data, bytes::Bytes::from_static(b"hello"));
        assert_eq!(content.content_type.as_deref(), Some("text/plain"));
        assert!(!content.historical);

        let chosen = key("2014/11/18/00/30/00/000/abc");
        node.put("flights", Content::new("old"), Some(chosen.clone())).await.unwrap();
        assert!(node.get("flights", &chosen).await.unwrap().historical);

        assert!(node.get("flights", &key("2014/11/18/00/30/00/000/zzz")).await.is_err());
    }

    #[tokio::test]
    async fn test_step_respects_retention_window() {
        let (node, _clock, _temp_dir) = create_test_node("2014-11-18T02:00:00Z").await;
        for k in [
            "2014/11/18/00/30/00/000/a",
            "2014/11/18/01/10/00/000/b",
            "2014/11/18/01/20/00/000/c",
        ] {
            node.put("flights", Content::new("x"), Some(key(k))).await.unwrap();
        }

        let after = node
            .step("flights", key("2014/11/18/00/00/00/000/0"), Direction::Next, 5, true)
            .await
            .unwrap();
        let hashes: Vec<_> = after.iter().map(|k| k.hash().to_string()).collect();
        assert_eq!(hashes, ["b", "c"]);

        let before = node
            .step("flights", key("2014/11/18/01/20/00/000/c"), Direction::Previous, 5, true)
            .await
            .unwrap();
        assert_eq!(before.len(), 1);

        let earliest = node.earliest("flights").await.unwrap().unwrap();
        assert_eq!(earliest.hash(), "b");
    }

    #[tokio::test]
    async fn test_latest_and_list() {
        let (node, clock, _temp_dir) = create_test_node("2014-11-18T01:00:00Z").await;
        node.put("flights", Content::new("x"), Some(key("2014/11/18/00/59/00/000/a")))
            .await
            .unwrap();
        let fresh = node.put("flights", Content::new("y"), None).await.unwrap();

        assert_eq!(node.latest("flights", true).await.unwrap().hash(), "a");
        assert_eq!(node.latest("flights", false).await, Some(fresh.clone()));

        let minute: TimeBucket = "2014/11/18/00/59".parse().unwrap();
        assert_eq!(node.list("flights", Some(&minute), true).await.len(), 1);
        assert_eq!(node.list("flights", None, true).await.len(), 1);
        clock.advance(Duration::from_secs(10));
        assert_eq!(node.list("flights", None, true).await.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_items() {
        let (node, _clock, _temp_dir) = create_test_node("2014-11-18T03:00:00Z").await;
        let old = key("2014/11/18/01/57/00/000/old");
        let fresh = key("2014/11/18/02/30/00/000/fresh");
        node.put("flights", Content::new("x"), Some(old.clone())).await.unwrap();
        node.put("flights", Content::new("x"), Some(fresh.clone())).await.unwrap();

        let report = node.sweep().await;
        assert_eq!(report.failures, 0);
        assert_eq!(report.items_evicted, 1);
        assert!(node.get("flights", &old).await.is_err());
        assert!(node.get("flights", &fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (node, _clock, _temp_dir) = create_test_node("2014-11-18T03:00:00Z").await;
        tokio::time::timeout(Duration::from_secs(5), node.serve(async {}))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_follow_delivers_stable_keys() {
        let (node, _clock, _temp_dir) = create_test_node("2014-11-18T01:00:00Z").await;
        for k in ["2014/11/18/00/57/00/000/a", "2014/11/18/00/58/00/000/b"] {
            node.put("flights", Content::new("x"), Some(key(k))).await.unwrap();
        }

        let mut seen = Vec::new();
        let start = "2014/11/18/00/56".parse().ok();
        node.follow("flights", "cli", start, 10, Duration::from_secs(1), |keys| {
            seen.extend(keys);
            false
        })
        .await;
        assert_eq!(seen.len(), 2);
    }
}
