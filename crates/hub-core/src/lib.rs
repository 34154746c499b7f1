//! # Hub Core
//!
//! Keys, time buckets and collaborator traits shared by the content hub.
//!
//! ## Key Types
//!
//! - [`ContentKey`]: point identifier of one stored item (timestamp + hash)
//! - [`TimeBucket`] / [`TimeUnit`]: second..month time ranges
//! - [`ContentPath`]: cursor position, either a key or a bucket
//!
//! ## Key Traits
//!
//! - [`Clock`]: time abstraction for testability, wrapped by [`TimeSource`]
//!   to derive the stable-time watermark
//! - [`ChannelRegistry`]: read-only channel retention settings
//! - [`CursorStore`]: version-checked consumer progress
//!
//! Range queries over candidate key sets are resolved by [`KeyRangeFilter`].

pub mod channel;
pub mod clock;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod key;
pub mod path;
pub mod time;

pub use channel::{ChannelConfig, ChannelRegistry, StaticChannelRegistry, validate_channel_name};
pub use clock::{Clock, DEFAULT_STABLE_LAG, ManualClock, SystemClock, TimeSource};
pub use cursor::{CursorStore, InMemoryCursorStore, Versioned};
pub use error::KeyError;
pub use filter::{Direction, KeyRangeFilter, MinuteBucket, RangeQuery, bucket_by_minute, filter_keys};
pub use key::ContentKey;
pub use path::ContentPath;
pub use time::{TimeBucket, TimeUnit};
