//! Time granularities and the buckets built on them
//!
//! Every bucket encodes as a zero-padded, slash-separated prefix of the
//! content key encoding (`YYYY/MM/DD/HH/mm/ss`), so plain string comparison
//! of two encodings at the same granularity matches their time order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Months, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Field names and widths of the canonical encoding, outermost first
pub(crate) const FIELDS: [(&str, usize); 7] = [
    ("year", 4),
    ("month", 2),
    ("day", 2),
    ("hour", 2),
    ("minute", 2),
    ("second", 2),
    ("millisecond", 3),
];

/// Granularity of a time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
}

impl TimeUnit {
    /// All units, finest first
    pub const ALL: [TimeUnit; 5] = [
        TimeUnit::Seconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
        TimeUnit::Months,
    ];

    /// Number of path segments in this unit's encoding
    pub fn segments(self) -> usize {
        match self {
            TimeUnit::Months => 2,
            TimeUnit::Days => 3,
            TimeUnit::Hours => 4,
            TimeUnit::Minutes => 5,
            TimeUnit::Seconds => 6,
        }
    }

    /// The unit whose encoding has `segments` segments
    pub fn from_segments(segments: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| unit.segments() == segments)
    }

    /// Round `time` down to the start of its bucket
    pub fn truncate(self, time: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = time.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            TimeUnit::Months => midnight - TimeDelta::days(i64::from(time.day0())),
            TimeUnit::Days => midnight,
            TimeUnit::Hours => midnight + TimeDelta::hours(i64::from(time.hour())),
            TimeUnit::Minutes => {
                midnight + TimeDelta::minutes(i64::from(time.hour() * 60 + time.minute()))
            }
            TimeUnit::Seconds => {
                midnight + TimeDelta::seconds(i64::from(time.num_seconds_from_midnight()))
            }
        }
    }

    /// Move `time` forward by `n` units (calendar months for `Months`)
    pub fn add(self, time: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            TimeUnit::Months => time.checked_add_months(Months::new(n)),
            _ => time.checked_add_signed(self.delta(n)),
        }
    }

    /// Move `time` backward by `n` units (calendar months for `Months`)
    pub fn sub(self, time: DateTime<Utc>, n: u32) -> Option<DateTime<Utc>> {
        match self {
            TimeUnit::Months => time.checked_sub_months(Months::new(n)),
            _ => time.checked_sub_signed(self.delta(n)),
        }
    }

    fn delta(self, n: u32) -> TimeDelta {
        let n = i64::from(n);
        match self {
            TimeUnit::Seconds => TimeDelta::seconds(n),
            TimeUnit::Minutes => TimeDelta::minutes(n),
            TimeUnit::Hours => TimeDelta::hours(n),
            TimeUnit::Days => TimeDelta::days(n),
            // calendar months are handled by the callers
            TimeUnit::Months => TimeDelta::zero(),
        }
    }

    /// Encode the bucket containing `time`, e.g. `2014/11/18/00` for hours
    pub fn format(self, time: DateTime<Utc>) -> String {
        let values = [
            time.year() as u32,
            time.month(),
            time.day(),
            time.hour(),
            time.minute(),
            time.second(),
        ];
        let mut out = String::with_capacity(19);
        for (i, (&(_, width), value)) in FIELDS.iter().zip(values).take(self.segments()).enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(&format!("{value:0width$}"));
        }
        out
    }

    /// Decode a bucket encoding at this granularity back into its start time
    pub fn parse(self, input: &str) -> Result<DateTime<Utc>, KeyError> {
        let segments: Vec<&str> = input.split('/').collect();
        if segments.len() != self.segments() {
            return Err(KeyError::SegmentCount {
                expected: self.segments(),
                actual: segments.len(),
                input: input.to_string(),
            });
        }
        let mut values = [0u32, 1, 1, 0, 0, 0];
        for (i, segment) in segments.iter().enumerate() {
            values[i] = parse_field(i, segment)?;
        }
        compose(input, values, 0)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Months => "months",
        };
        f.write_str(name)
    }
}

/// Parse one fixed-width numeric segment of the canonical encoding
pub(crate) fn parse_field(index: usize, segment: &str) -> Result<u32, KeyError> {
    let (name, width) = FIELDS[index];
    if segment.len() != width || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::field(name, segment));
    }
    segment.parse().map_err(|_| KeyError::field(name, segment))
}

/// Assemble `[year, month, day, hour, minute, second]` plus millis into a UTC time
pub(crate) fn compose(input: &str, v: [u32; 6], millis: u32) -> Result<DateTime<Utc>, KeyError> {
    let base = Utc
        .with_ymd_and_hms(v[0] as i32, v[1], v[2], v[3], v[4], v[5])
        .single()
        .ok_or_else(|| KeyError::InvalidTime(input.to_string()))?;
    Ok(base + TimeDelta::milliseconds(i64::from(millis)))
}

/// A half-open time range `[start, end)` at a fixed granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBucket {
    unit: TimeUnit,
    start: DateTime<Utc>,
}

impl TimeBucket {
    /// The bucket of granularity `unit` that contains `time`
    pub fn new(unit: TimeUnit, time: DateTime<Utc>) -> Self {
        Self {
            unit,
            start: unit.truncate(time),
        }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound
    pub fn end(&self) -> DateTime<Utc> {
        self.unit
            .add(self.start, 1)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end()
    }

    /// The adjacent bucket of the same granularity
    pub fn next(&self) -> Option<Self> {
        self.unit.add(self.start, 1).map(|start| Self::new(self.unit, start))
    }

    /// The preceding bucket of the same granularity
    pub fn previous(&self) -> Option<Self> {
        self.unit.sub(self.start, 1).map(|start| Self::new(self.unit, start))
    }

    pub fn url(&self) -> String {
        self.unit.format(self.start)
    }

    /// Parse a bucket encoding, inferring the unit from the segment count
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let segments = input.split('/').count();
        let unit = TimeUnit::from_segments(segments).ok_or_else(|| KeyError::SegmentCount {
            expected: TimeUnit::Minutes.segments(),
            actual: segments,
            input: input.to_string(),
        })?;
        Ok(Self::new(unit, unit.parse(input)?))
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for TimeBucket {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
