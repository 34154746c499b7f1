//! Cursor positions: either a single key or a whole time bucket

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::key::{ContentKey, KEY_SEGMENTS};
use crate::time::{TimeBucket, TimeUnit};

/// A position in a channel's timeline
///
/// Consumers checkpoint progress either item by item (`Key`) or bucket by
/// bucket (`Bucket`). Paths order by start time: a bucket sorts before every
/// key it contains and after every key stamped before its start. Buckets
/// starting at the same instant order finest unit first.
///
/// Progress comparisons use [`ContentPath::cmp_progress`] instead, where a
/// bucket checkpoint means everything inside it has been handled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContentPath {
    Key(ContentKey),
    Bucket(TimeBucket),
}

impl ContentPath {
    /// Start time of the position
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            ContentPath::Key(key) => key.time(),
            ContentPath::Bucket(bucket) => bucket.start(),
        }
    }

    pub fn to_url(&self) -> String {
        match self {
            ContentPath::Key(key) => key.to_url(),
            ContentPath::Bucket(bucket) => bucket.url(),
        }
    }

    /// Parse a key or bucket encoding, chosen by segment count
    pub fn from_url(input: &str) -> Result<Self, KeyError> {
        if input.split('/').count() == KEY_SEGMENTS {
            ContentKey::from_url(input).map(ContentPath::Key)
        } else {
            TimeBucket::parse(input).map(ContentPath::Bucket)
        }
    }

    pub fn as_key(&self) -> Option<&ContentKey> {
        match self {
            ContentPath::Key(key) => Some(key),
            ContentPath::Bucket(_) => None,
        }
    }

    /// Compare how far two checkpoints have progressed
    ///
    /// A bucket counts as reached at its exclusive end: after every key it
    /// contains and before any key stamped exactly at its end. Buckets ending
    /// at the same instant order finest unit first.
    pub fn cmp_progress(&self, other: &Self) -> Ordering {
        self.progress_key().cmp(&other.progress_key())
    }

    fn sort_key(&self) -> (DateTime<Utc>, u8, Option<TimeUnit>, &str) {
        match self {
            ContentPath::Bucket(bucket) => (bucket.start(), 0, Some(bucket.unit()), ""),
            ContentPath::Key(key) => (key.time(), 1, None, key.hash()),
        }
    }

    fn progress_key(&self) -> (DateTime<Utc>, u8, Option<TimeUnit>, &str) {
        match self {
            ContentPath::Bucket(bucket) => (bucket.end(), 0, Some(bucket.unit()), ""),
            ContentPath::Key(key) => (key.time(), 1, None, key.hash()),
        }
    }
}

impl Ord for ContentPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for ContentPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<ContentKey> for ContentPath {
    fn from(key: ContentKey) -> Self {
        ContentPath::Key(key)
    }
}

impl From<TimeBucket> for ContentPath {
    fn from(bucket: TimeBucket) -> Self {
        ContentPath::Bucket(bucket)
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for ContentPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_url(s)
    }
}

impl TryFrom<String> for ContentPath {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_url(&value)
    }
}

impl From<ContentPath> for String {
    fn from(path: ContentPath) -> Self {
        path.to_url()
    }
}
