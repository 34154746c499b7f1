//! Point identifiers for stored items
//!
//! A [`ContentKey`] is a millisecond timestamp plus a short hash that
//! disambiguates items written in the same millisecond. Its canonical
//! encoding is `YYYY/MM/DD/HH/mm/ss/SSS/hash`; because every numeric field is
//! zero padded, lexicographic order of encodings equals key order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::time::{TimeBucket, TimeUnit, compose, parse_field};

/// Length of generated hashes
pub const HASH_LENGTH: usize = 6;

/// Number of path segments in a key encoding
pub const KEY_SEGMENTS: usize = 8;

/// Identifier of one stored item
///
/// Ordered by timestamp, then by hash. Immutable once minted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey {
    time: DateTime<Utc>,
    hash: String,
}

impl ContentKey {
    /// Create a key from a timestamp and hash
    ///
    /// The timestamp is truncated to millisecond precision.
    ///
    /// # Errors
    ///
    /// Fails if the year is outside `0..=9999` (the encoding is four digits)
    /// or the hash is empty or contains characters other than ASCII
    /// alphanumerics, `-` and `_`.
    pub fn new(time: DateTime<Utc>, hash: impl Into<String>) -> Result<Self, KeyError> {
        let hash = hash.into();
        validate_hash(&hash)?;
        if !(0..=9999).contains(&time.year()) {
            return Err(KeyError::YearOutOfRange(time.year()));
        }
        let time = DateTime::from_timestamp_millis(time.timestamp_millis())
            .ok_or_else(|| KeyError::InvalidTime(time.to_rfc3339()))?;
        Ok(Self { time, hash })
    }

    /// Mint a key at `time` with a random hash
    pub fn at(time: DateTime<Utc>) -> Result<Self, KeyError> {
        Self::new(time, random_hash())
    }

    /// Decode a canonical `YYYY/MM/DD/HH/mm/ss/SSS/hash` encoding
    pub fn from_url(input: &str) -> Result<Self, KeyError> {
        let segments: Vec<&str> = input.split('/').collect();
        if segments.len() != KEY_SEGMENTS {
            return Err(KeyError::SegmentCount {
                expected: KEY_SEGMENTS,
                actual: segments.len(),
                input: input.to_string(),
            });
        }
        let mut values = [0u32; 6];
        for (i, value) in values.iter_mut().enumerate() {
            *value = parse_field(i, segments[i])?;
        }
        let millis = parse_field(6, segments[6])?;
        let time = compose(input, values, millis)?;
        Self::new(time, segments[7])
    }

    /// Canonical encoding
    pub fn to_url(&self) -> String {
        format!(
            "{}/{:03}/{}",
            TimeUnit::Seconds.format(self.time),
            self.millisecond(),
            self.hash
        )
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Milliseconds since the Unix epoch
    pub fn millis(&self) -> i64 {
        self.time.timestamp_millis()
    }

    pub fn year(&self) -> i32 {
        self.time.year()
    }

    pub fn month(&self) -> u32 {
        self.time.month()
    }

    pub fn day(&self) -> u32 {
        self.time.day()
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    pub fn second(&self) -> u32 {
        self.time.second()
    }

    pub fn millisecond(&self) -> u32 {
        self.time.timestamp_subsec_millis()
    }

    /// The bucket of granularity `unit` holding this key
    pub fn bucket(&self, unit: TimeUnit) -> TimeBucket {
        TimeBucket::new(unit, self.time)
    }

    /// Age relative to `now`, zero for keys in the future
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.time).to_std().unwrap_or_default()
    }
}

fn validate_hash(hash: &str) -> Result<(), KeyError> {
    let valid = !hash.is_empty()
        && hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidHash(hash.to_string()))
    }
}

/// Generate a random alphanumeric hash
pub fn random_hash() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(HASH_LENGTH)
        .map(char::from)
        .collect()
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for ContentKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_url(s)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_url(&value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.to_url()
    }
}
