//! Time abstraction for testability
//!
//! - [`Clock`]: wall-clock and monotonic time plus async sleep
//! - [`SystemClock`]: real time
//! - [`ManualClock`]: time that only moves when told to
//! - [`TimeSource`]: a clock plus the stable-time watermark

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

use crate::time::TimeUnit;

/// Default lag between "now" and the stable-time watermark
pub const DEFAULT_STABLE_LAG: Duration = Duration::from_secs(5);

/// Abstraction over time
pub trait Clock: Send + Sync {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get the current UTC datetime
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleep for a duration (async)
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock driven by the caller
///
/// Clones share the same time, so a test can keep one handle and pass
/// another into the component under test. `sleep` advances the clock instead
/// of waiting.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: start,
            current: Arc::new(RwLock::new(start)),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = time;
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = current.checked_add_signed(delta).unwrap_or(*current);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = (self.now_utc() - self.origin_utc).to_std().unwrap_or_default();
        self.origin + elapsed
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// A clock paired with the stable-time lag
///
/// Stable time is the instant before which every write is assumed durably
/// visible across the cluster: `now - lag`, rounded down to the second.
#[derive(Debug, Clone)]
pub struct TimeSource<C> {
    clock: C,
    stable_lag: Duration,
}

impl<C: Clock> TimeSource<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            stable_lag: DEFAULT_STABLE_LAG,
        }
    }

    pub fn with_stable_lag(mut self, lag: Duration) -> Self {
        self.stable_lag = lag;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    /// The stable-time watermark
    pub fn stable(&self) -> DateTime<Utc> {
        let lag = TimeDelta::from_std(self.stable_lag).unwrap_or(TimeDelta::zero());
        TimeUnit::Seconds.truncate(self.now() - lag)
    }

    pub fn stable_lag(&self) -> Duration {
        self.stable_lag
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub async fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration).await;
    }
}

impl Default for TimeSource<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}
