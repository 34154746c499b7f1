//! Retention sweeper
//!
//! Live channels only ever receive writes stamped "now", so each cycle
//! deletes the specific minute, hour, day and month buckets that just fell
//! out of the retention window instead of scanning the channel. Historical
//! channels can be written anywhere in the past and are swept by age.
//!
//! Every `reconcile_every` cycles the age sweep also runs over live channels,
//! reclaiming buckets the bounded deletes missed while the schedule was
//! delayed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use hub_core::{ChannelConfig, ChannelRegistry, Clock, TimeBucket, TimeSource, TimeUnit};

use crate::SpokeStore;
use crate::dao::SpokeContentDao;

/// Number of past cycles whose buckets each live sweep revisits
pub const SWEEP_LOOKBACK: u32 = 2;

/// Shortest time between cycles; shorter configured intervals are raised to it
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sweeper settings
#[derive(Debug, Clone)]
pub struct TtlConfig {
    pub enabled: bool,
    /// Time between cycles
    pub interval: Duration,
    /// Wait before deleting buckets found by the age sweep
    pub grace: Duration,
    /// Run the age sweep over live channels every this many cycles (0 = never)
    pub reconcile_every: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(3),
            reconcile_every: 60,
        }
    }
}

impl TtlConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_reconcile_every(mut self, cycles: u64) -> Self {
        self.reconcile_every = cycles;
        self
    }
}

/// Outcome of one sweep cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 1-based cycle number
    pub cycle: u64,
    pub items_evicted: u64,
    /// Age of the oldest item left in any channel
    pub oldest_item_age: Option<Duration>,
    pub oldest_channel: Option<String>,
    pub channels_swept: usize,
    /// Bucket deletes that failed this cycle
    pub failures: usize,
    /// Whether live channels were also swept by age
    pub reconciled: bool,
    pub runtime: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Running,
}

#[derive(Debug, Default)]
struct ChannelSweep {
    evicted: u64,
    failures: usize,
}

impl ChannelSweep {
    fn absorb(&mut self, other: ChannelSweep) {
        self.evicted += other.evicted;
        self.failures += other.failures;
    }
}

/// The instant before which a channel's items are expired
///
/// One extra minute is kept so the minute holding the retention edge is
/// never deleted early.
pub fn retention_boundary(stable: DateTime<Utc>, ttl_minutes: u64) -> DateTime<Utc> {
    let minutes = i64::try_from(ttl_minutes.saturating_add(1)).unwrap_or(i64::MAX);
    TimeDelta::try_minutes(minutes)
        .and_then(|ttl| stable.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Buckets a live sweep deletes for `boundary`
pub fn live_targets(boundary: DateTime<Utc>) -> Vec<TimeBucket> {
    let mut targets = Vec::new();
    for i in 0..SWEEP_LOOKBACK {
        let offsets = [
            (TimeUnit::Minutes, i),
            (TimeUnit::Hours, i + 1),
            (TimeUnit::Days, i + 1),
            (TimeUnit::Months, i + 1),
        ];
        for (unit, n) in offsets {
            if let Some(time) = unit.sub(boundary, n) {
                targets.push(TimeBucket::new(unit, time));
            }
        }
    }
    targets
}

/// Periodic retention enforcement over every channel in a registry
pub struct TtlEnforcer<S: ?Sized, R: ?Sized, C> {
    dao: SpokeContentDao<S, C>,
    channels: Arc<R>,
    config: TtlConfig,
    cycle: AtomicU64,
    state: watch::Sender<SweeperState>,
    reports: watch::Sender<SweepReport>,
}

impl<S, R, C> TtlEnforcer<S, R, C>
where
    S: SpokeStore + ?Sized + 'static,
    R: ChannelRegistry + ?Sized + 'static,
    C: Clock + 'static,
{
    pub fn new(store: Arc<S>, channels: Arc<R>, time: TimeSource<C>, config: TtlConfig) -> Self {
        Self {
            dao: SpokeContentDao::new(store, time),
            channels,
            config,
            cycle: AtomicU64::new(0),
            state: watch::Sender::new(SweeperState::Idle),
            reports: watch::Sender::new(SweepReport::default()),
        }
    }

    /// Reports of completed cycles
    pub fn subscribe(&self) -> watch::Receiver<SweepReport> {
        self.reports.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<SweeperState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &TtlConfig {
        &self.config
    }

    /// Run one sweep cycle over every channel
    pub async fn sweep_once(&self) -> SweepReport {
        let started = Instant::now();
        self.state.send_replace(SweeperState::Running);

        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let reconcile = self.config.reconcile_every > 0 && cycle % self.config.reconcile_every == 0;
        let stable = self.dao.time().stable();
        let channels = self.channels.channels().await;

        let mut report = SweepReport {
            cycle,
            reconciled: reconcile,
            ..SweepReport::default()
        };
        for channel in &channels {
            let outcome = self.sweep_channel(channel, stable, reconcile).await;
            report.items_evicted += outcome.evicted;
            report.failures += outcome.failures;
            report.channels_swept += 1;
        }

        let names: Vec<String> = channels.iter().map(|c| c.name.clone()).collect();
        if let Some((channel, key)) = self.dao.oldest_item(&names).await {
            report.oldest_item_age = Some(key.age(self.dao.time().now()));
            report.oldest_channel = Some(channel);
        }
        report.runtime = started.elapsed();

        info!(
            cycle,
            items_evicted = report.items_evicted,
            oldest_item_age_secs = report.oldest_item_age.map(|age| age.as_secs()),
            channels = report.channels_swept,
            failures = report.failures,
            reconciled = report.reconciled,
            runtime_ms = report.runtime.as_millis() as u64,
            "Sweep complete"
        );

        self.reports.send_replace(report.clone());
        self.state.send_replace(SweeperState::Idle);
        report
    }

    async fn sweep_channel(
        &self,
        channel: &ChannelConfig,
        stable: DateTime<Utc>,
        reconcile: bool,
    ) -> ChannelSweep {
        let boundary = retention_boundary(stable, channel.ttl_minutes);
        debug!(channel = %channel.name, live = channel.live, boundary = %boundary, "Sweeping channel");

        if !channel.live {
            return self.sweep_by_age(&channel.name, boundary).await;
        }
        let mut outcome = self.sweep_live(&channel.name, boundary).await;
        if reconcile {
            outcome.absorb(self.sweep_by_age(&channel.name, boundary).await);
        }
        outcome
    }

    async fn sweep_live(&self, channel: &str, boundary: DateTime<Utc>) -> ChannelSweep {
        let targets = live_targets(boundary);
        self.delete_buckets(channel, &targets).await
    }

    async fn sweep_by_age(&self, channel: &str, cutoff: DateTime<Utc>) -> ChannelSweep {
        let expired = self.dao.store().expired_buckets(channel, cutoff).await;
        if expired.is_empty() {
            return ChannelSweep::default();
        }
        // let writers already inside an expired bucket finish
        self.dao.time().sleep(self.config.grace).await;
        self.delete_buckets(channel, &expired).await
    }

    async fn delete_buckets(&self, channel: &str, buckets: &[TimeBucket]) -> ChannelSweep {
        let mut outcome = ChannelSweep::default();
        for bucket in buckets {
            match self.dao.store().delete(channel, Some(bucket)).await {
                Ok(0) => {}
                Ok(removed) => {
                    debug!(channel, bucket = %bucket, removed, "Evicted bucket");
                    outcome.evicted += removed;
                }
                Err(e) => {
                    warn!(channel, bucket = %bucket, error = %e, "Unable to evict bucket");
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }

    /// Spawn the sweep loop as a background task
    ///
    /// The in-flight cycle always completes; shutdown only stops further
    /// cycles from being scheduled.
    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown_rx).await;
        })
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Retention sweeper disabled");
            return;
        }
        let period = self.config.interval.max(MIN_INTERVAL);
        if period != self.config.interval {
            warn!(interval_ms = period.as_millis() as u64, "Sweep interval raised to minimum");
        }
        info!(
            interval_ms = period.as_millis() as u64,
            reconcile_every = self.config.reconcile_every,
            "Retention sweeper started"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Retention sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySpokeStore;
    use hub_core::{ContentKey, ManualClock, StaticChannelRegistry};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn key(s: &str) -> ContentKey {
        s.parse().unwrap()
    }

    type TestEnforcer = TtlEnforcer<InMemorySpokeStore, StaticChannelRegistry, ManualClock>;

    fn create_test_enforcer(
        now: &str,
        channels: Vec<ChannelConfig>,
        config: TtlConfig,
    ) -> (TestEnforcer, Arc<InMemorySpokeStore>, ManualClock) {
        let store = Arc::new(InMemorySpokeStore::new());
        let clock = ManualClock::new(at(now));
        let enforcer = TtlEnforcer::new(
            store.clone(),
            Arc::new(StaticChannelRegistry::from_configs(channels)),
            TimeSource::new(clock.clone()),
            config,
        );
        (enforcer, store, clock)
    }

    async fn write(store: &InMemorySpokeStore, channel: &str, keys: &[&str]) {
        for k in keys {
            store.write(channel, &key(k), b"x").await.unwrap();
        }
    }

    #[test]
    fn test_retention_boundary() {
        let stable = at("2014-11-18T02:00:00Z");
        assert_eq!(retention_boundary(stable, 60), at("2014-11-18T00:59:00Z"));
        assert_eq!(retention_boundary(stable, u64::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_live_targets() {
        let urls: Vec<_> = live_targets(at("2014-11-18T00:59:30Z"))
            .iter()
            .map(TimeBucket::url)
            .collect();
        assert_eq!(
            urls,
            [
                "2014/11/18/00/59",
                "2014/11/17/23",
                "2014/11/17",
                "2014/10",
                "2014/11/18/00/58",
                "2014/11/17/22",
                "2014/11/16",
                "2014/09",
            ]
        );
    }

    #[tokio::test]
    async fn test_live_sweep_keeps_retention_window() {
        let (enforcer, store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default(),
        );
        // boundary is 00:59:00
        write(
            &store,
            "flights",
            &[
                "2014/11/18/00/58/10/000/a",
                "2014/11/18/00/59/59/999/b",
                "2014/11/18/01/00/00/000/c",
                "2014/11/18/01/59/00/000/d",
            ],
        )
        .await;

        let report = enforcer.sweep_once().await;

        assert_eq!(report.items_evicted, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(report.channels_swept, 1);
        let left: Vec<_> = store
            .keys_in_bucket("flights", None)
            .await
            .iter()
            .map(|k| k.hash().to_string())
            .collect();
        assert_eq!(left, ["c", "d"]);
        assert_eq!(report.oldest_channel.as_deref(), Some("flights"));
        assert_eq!(report.oldest_item_age, Some(Duration::from_secs(3605)));
    }

    #[tokio::test]
    async fn test_historical_sweep_by_age() {
        let (enforcer, store, clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("archive", 60).unwrap().historical()],
            TtlConfig::default(),
        );
        write(
            &store,
            "archive",
            &[
                "2001/01/01/00/00/00/000/a",
                "2014/11/17/12/00/00/000/b",
                "2014/11/18/01/30/00/000/c",
            ],
        )
        .await;

        let report = enforcer.sweep_once().await;

        assert_eq!(report.items_evicted, 2);
        assert_eq!(store.len("archive"), 1);
        // the grace wait ran on the injected clock
        assert_eq!(clock.now_utc(), at("2014-11-18T02:00:08Z"));
    }

    #[tokio::test]
    async fn test_reconcile_reclaims_leaked_buckets() {
        let (enforcer, store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default().with_reconcile_every(2),
        );
        // outside every bounded target
        write(&store, "flights", &["2014/11/18/00/30/00/000/leak"]).await;

        let first = enforcer.sweep_once().await;
        assert!(!first.reconciled);
        assert_eq!(first.items_evicted, 0);
        assert_eq!(store.len("flights"), 1);

        let second = enforcer.sweep_once().await;
        assert!(second.reconciled);
        assert_eq!(second.items_evicted, 1);
        assert_eq!(store.len("flights"), 0);
        assert_eq!(second.oldest_item_age, None);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_abort_cycle() {
        let broken = ChannelConfig {
            name: "not/valid".to_string(),
            ttl_minutes: 60,
            live: true,
        };
        let (enforcer, store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![broken, ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default(),
        );
        write(&store, "flights", &["2014/11/18/00/59/00/000/a"]).await;

        let report = enforcer.sweep_once().await;

        assert_eq!(report.channels_swept, 2);
        assert_eq!(report.failures, live_targets(at("2014-11-18T00:59:00Z")).len());
        assert_eq!(report.items_evicted, 1);
    }

    #[tokio::test]
    async fn test_reports_and_state_published() {
        let (enforcer, _store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default(),
        );
        let reports = enforcer.subscribe();
        let state = enforcer.state();

        enforcer.sweep_once().await;
        enforcer.sweep_once().await;

        assert_eq!(reports.borrow().cycle, 2);
        assert_eq!(*state.borrow(), SweeperState::Idle);
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let (enforcer, _store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default().with_interval(Duration::from_millis(10)),
        );
        let mut reports = enforcer.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = enforcer.spawn(shutdown_rx);
        reports.changed().await.unwrap();
        assert!(reports.borrow().cycle >= 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_runs_at_minimum() {
        let (enforcer, _store, _clock) = create_test_enforcer(
            "2014-11-18T02:00:05Z",
            vec![ChannelConfig::new("flights", 60).unwrap()],
            TtlConfig::default().with_interval(Duration::ZERO),
        );
        let mut reports = enforcer.subscribe();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = enforcer.spawn(shutdown_rx);
        reports.changed().await.unwrap();
        reports.changed().await.unwrap();
        assert!(reports.borrow().cycle >= 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
