//! Stored item bodies
//!
//! A [`Content`] is what a client posts to a channel: the payload plus the
//! headers needed to serve it back. It is stored as one postcard record
//! behind a format byte.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Leading byte of every encoded item
const FORMAT_V1: u8 = 1;

/// A stored item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// MIME type supplied by the writer
    pub content_type: Option<String>,
    pub content_language: Option<String>,
    /// Written with an explicit key into the past
    pub historical: bool,
    pub data: Bytes,
}

impl Content {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_language(mut self, language: impl Into<String>) -> Self {
        self.content_language = Some(language.into());
        self
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize for storage
    pub fn encode(&self) -> Result<Vec<u8>, StorageError> {
        let mut out = vec![FORMAT_V1];
        let body = postcard::to_allocvec(self).map_err(|e| StorageError::serialization(e.to_string()))?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize a stored record
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        match bytes.split_first() {
            Some((&FORMAT_V1, body)) => Ok(postcard::from_bytes(body)?),
            Some((version, _)) => Err(StorageError::deserialization(format!(
                "unknown content format {version}"
            ))),
            None => Err(StorageError::deserialization("empty record")),
        }
    }
}
