//! Key-range filtering for time and direction queries
//!
//! Range queries are exclusive of their starting key in both directions,
//! never return keys older than the retention cutoff, and always yield
//! results in ascending order even when walking backwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::clock::{Clock, TimeSource};
use crate::key::ContentKey;
use crate::time::{TimeBucket, TimeUnit};

/// Traversal direction of a range query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
}

impl Direction {
    pub fn is_next(self) -> bool {
        self == Direction::Next
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Next => f.write_str("next"),
            Direction::Previous => f.write_str("previous"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    /// Accepts anything starting with `n` or `p` (`next`, `n`, `prev`, ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.chars().next() {
            Some('n') => Ok(Direction::Next),
            Some('p') => Ok(Direction::Previous),
            _ => Err(format!("unknown direction {s:?}")),
        }
    }
}

/// Parameters of a directional range query
#[derive(Debug, Clone)]
pub struct RangeQuery {
    /// Exclusive starting point
    pub limit: ContentKey,
    /// Keys strictly older than this are never returned
    pub ttl_cutoff: DateTime<Utc>,
    /// Maximum number of keys returned
    pub count: usize,
    pub direction: Direction,
    /// Hide keys at or after the stable-time watermark (next only)
    pub stable: bool,
}

impl RangeQuery {
    pub fn new(limit: ContentKey, direction: Direction, count: usize) -> Self {
        Self {
            limit,
            ttl_cutoff: DateTime::<Utc>::MIN_UTC,
            count,
            direction,
            stable: true,
        }
    }

    pub fn with_ttl_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.ttl_cutoff = cutoff;
        self
    }

    pub fn with_stable(mut self, stable: bool) -> Self {
        self.stable = stable;
        self
    }
}

/// Resolves range queries against candidate key sets
///
/// Holds the time source used for the stable-time watermark.
#[derive(Debug, Clone)]
pub struct KeyRangeFilter<C> {
    time: TimeSource<C>,
}

impl<C: Clock> KeyRangeFilter<C> {
    pub fn new(time: TimeSource<C>) -> Self {
        Self { time }
    }

    pub fn time(&self) -> &TimeSource<C> {
        &self.time
    }

    /// Filter `keys` down to the bounded, ordered answer of `query`
    pub fn filter<I>(&self, keys: I, query: &RangeQuery) -> BTreeSet<ContentKey>
    where
        I: IntoIterator<Item = ContentKey>,
    {
        let stable_time = (query.stable && query.direction.is_next()).then(|| self.time.stable());
        filter_keys(keys, query, stable_time)
    }
}

/// Pure form of [`KeyRangeFilter::filter`] with an explicit watermark
pub fn filter_keys<I>(
    keys: I,
    query: &RangeQuery,
    stable_time: Option<DateTime<Utc>>,
) -> BTreeSet<ContentKey>
where
    I: IntoIterator<Item = ContentKey>,
{
    let keys: BTreeSet<ContentKey> = keys.into_iter().collect();
    let retained = |key: &&ContentKey| key.time() >= query.ttl_cutoff;

    let selected: BTreeSet<ContentKey> = match query.direction {
        Direction::Next => keys
            .range((Bound::Excluded(&query.limit), Bound::Unbounded))
            .filter(|key| stable_time.is_none_or(|stable| key.time() < stable))
            .filter(retained)
            .take(query.count)
            .cloned()
            .collect(),
        Direction::Previous => keys
            .range(..&query.limit)
            .rev()
            .filter(retained)
            .take(query.count)
            .cloned()
            .collect(),
    };

    trace!(
        candidates = keys.len(),
        selected = selected.len(),
        limit = %query.limit,
        direction = %query.direction,
        "Filtered key range"
    );
    selected
}

/// Keys grouped under the minute they were written in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinuteBucket {
    pub bucket: TimeBucket,
    pub keys: BTreeSet<ContentKey>,
}

/// Group a key set into ascending minute buckets
pub fn bucket_by_minute<'a, I>(keys: I) -> Vec<MinuteBucket>
where
    I: IntoIterator<Item = &'a ContentKey>,
{
    let mut minutes: BTreeMap<DateTime<Utc>, MinuteBucket> = BTreeMap::new();
    for key in keys {
        let bucket = key.bucket(TimeUnit::Minutes);
        minutes
            .entry(bucket.start())
            .or_insert_with(|| MinuteBucket {
                bucket,
                keys: BTreeSet::new(),
            })
            .keys
            .insert(key.clone());
    }
    minutes.into_values().collect()
}
