//! Error types for hub-core

use thiserror::Error;

/// Errors raised when a key, bucket or channel string cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("expected {expected} path segments, got {actual} in {input:?}")]
    SegmentCount {
        expected: usize,
        actual: usize,
        input: String,
    },

    #[error("invalid {field} segment {segment:?}")]
    InvalidField {
        field: &'static str,
        segment: String,
    },

    #[error("time is not representable: {0}")]
    InvalidTime(String),

    #[error("year {0} is outside 0..=9999")]
    YearOutOfRange(i32),

    #[error("invalid hash {0:?}")]
    InvalidHash(String),

    #[error("invalid channel name {0:?}")]
    InvalidChannelName(String),
}

impl KeyError {
    pub(crate) fn field(field: &'static str, segment: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            segment: segment.into(),
        }
    }
}
