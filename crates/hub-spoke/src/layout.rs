//! Mapping between content keys and the on-disk hierarchy
//!
//! An item with key `YYYY/MM/DD/HH/mm/ss/SSS/hash` in channel `c` lives at
//! `root/c/YYYY/MM/DD/HH/mm/ssSSShash`. Seconds and millis are folded into
//! the file name so a minute directory holds every item of that minute, and
//! because both are fixed width, file name order equals key order.
//!
//! Paths that do not have the full item shape fall back to a flat layout
//! under the root (see [`url_path`]).

use std::path::{Path, PathBuf};

use hub_core::{ContentKey, KeyError, TimeBucket, TimeUnit};

/// Width of the seconds prefix of a file name
const SECONDS_WIDTH: usize = 2;

/// Width of the seconds + millis prefix of a file name
const TIME_PREFIX_WIDTH: usize = 5;

/// Segments in a `channel/Y/M/D/H/m/s/ms/hash` item path
const ITEM_PATH_SEGMENTS: usize = 9;

/// Directory levels below a channel, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Year,
        Level::Month,
        Level::Day,
        Level::Hour,
        Level::Minute,
    ];

    /// Number of directories between the channel and this level, inclusive
    pub fn depth(self) -> usize {
        self as usize + 1
    }

    /// The level at `index` directories below the channel (0 = year)
    pub fn at(index: usize) -> Option<Level> {
        Self::ALL.get(index).copied()
    }

    fn width(self) -> usize {
        match self {
            Level::Year => 4,
            _ => 2,
        }
    }

    /// Whether `name` is a directory name at this level
    pub fn matches(self, name: &str) -> bool {
        name.len() == self.width() && name.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Directory names from the channel down to the minute of `key`
pub fn minute_segments(key: &ContentKey) -> [String; 5] {
    [
        format!("{:04}", key.year()),
        format!("{:02}", key.month()),
        format!("{:02}", key.day()),
        format!("{:02}", key.hour()),
        format!("{:02}", key.minute()),
    ]
}

/// File name of `key` inside its minute directory
pub fn file_name(key: &ContentKey) -> String {
    format!("{:02}{:03}{}", key.second(), key.millisecond(), key.hash())
}

/// Whether `name` has the shape of an item file
///
/// Temporary files start with a dot and never match.
pub fn is_item_name(name: &str) -> bool {
    name.len() > TIME_PREFIX_WIDTH
        && name.as_bytes()[..TIME_PREFIX_WIDTH]
            .iter()
            .all(u8::is_ascii_digit)
}

/// Rebuild a key from its minute directory names and file name
pub fn decode_item<S: AsRef<str>>(dirs: &[S], name: &str) -> Result<ContentKey, KeyError> {
    let truncated = |field: &'static str| KeyError::InvalidField {
        field,
        segment: name.to_string(),
    };
    let (seconds, rest) = name
        .split_at_checked(SECONDS_WIDTH)
        .ok_or_else(|| truncated("second"))?;
    let (millis, hash) = rest
        .split_at_checked(TIME_PREFIX_WIDTH - SECONDS_WIDTH)
        .ok_or_else(|| truncated("millisecond"))?;
    let mut url = join_segments(dirs);
    for part in [seconds, millis, hash] {
        url.push('/');
        url.push_str(part);
    }
    ContentKey::from_url(&url)
}

/// Directory of a channel
pub fn channel_dir(root: &Path, channel: &str) -> PathBuf {
    root.join(channel)
}

/// Full path of the file holding `key`
pub fn item_path(root: &Path, channel: &str, key: &ContentKey) -> PathBuf {
    let mut path = channel_dir(root, channel);
    path.extend(minute_segments(key));
    path.push(file_name(key));
    path
}

/// Where the items of a bucket live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    /// Directory holding the bucket
    pub dir: PathBuf,
    /// Directory names from the channel to `dir`
    pub segments: Vec<String>,
    /// Set for second buckets, which share a minute directory
    pub name_prefix: Option<String>,
}

impl BucketLocation {
    /// Whether file `name` in [`BucketLocation::dir`] belongs to the bucket
    pub fn holds(&self, name: &str) -> bool {
        is_item_name(name)
            && self
                .name_prefix
                .as_deref()
                .is_none_or(|prefix| name.starts_with(prefix))
    }
}

/// Locate `bucket` under a channel, or the whole channel for `None`
pub fn bucket_location(root: &Path, channel: &str, bucket: Option<&TimeBucket>) -> BucketLocation {
    let mut segments: Vec<String> = match bucket {
        Some(bucket) => bucket.url().split('/').map(str::to_string).collect(),
        None => Vec::new(),
    };
    let name_prefix = match bucket.map(TimeBucket::unit) {
        Some(TimeUnit::Seconds) => segments.pop(),
        _ => None,
    };
    let mut dir = channel_dir(root, channel);
    dir.extend(&segments);
    BucketLocation {
        dir,
        segments,
        name_prefix,
    }
}

/// The time range covered by a directory `segments` below the channel
///
/// Year directories have no [`TimeBucket`] granularity; they are reported as
/// `(start, end)` of the calendar year.
pub fn directory_range<S: AsRef<str>>(
    segments: &[S],
) -> Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> {
    match segments.len() {
        0 => None,
        1 => {
            let start = TimeUnit::Months
                .parse(&format!("{}/01", segments[0].as_ref()))
                .ok()?;
            let end = TimeUnit::Months
                .add(start, 12)
                .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
            Some((start, end))
        }
        _ => {
            let bucket = TimeBucket::parse(&join_segments(segments)).ok()?;
            Some((bucket.start(), bucket.end()))
        }
    }
}

/// Resolve a raw URL-style path to a file
///
/// A path with at least the nine segments of `channel/Y/M/D/H/m/s/ms/hash`
/// uses the minute layout; anything shorter is stored flat under the root.
pub fn url_path(root: &Path, url: &str) -> PathBuf {
    let segments: Vec<&str> = url.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < ITEM_PATH_SEGMENTS {
        let mut path = root.to_path_buf();
        path.extend(&segments);
        return path;
    }
    let mut path = root.to_path_buf();
    path.extend(&segments[..6]);
    path.push(segments[6..].concat());
    path
}

fn join_segments<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("/")
}
