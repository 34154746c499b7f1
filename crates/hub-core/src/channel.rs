//! Channel configuration as seen by the storage core
//!
//! The core only reads channel settings; ownership of the configuration
//! lives with whoever implements [`ChannelRegistry`].

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Maximum channel name length
pub const MAX_CHANNEL_NAME: usize = 48;

/// Default retention window for the short-term store
pub const DEFAULT_TTL_MINUTES: u64 = 60;

/// Retention settings for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    /// Retention window in minutes
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    /// Live channels receive writes stamped "now"; historical channels may
    /// be written anywhere in the past
    #[serde(default = "default_live")]
    pub live: bool,
}

fn default_ttl_minutes() -> u64 {
    DEFAULT_TTL_MINUTES
}

fn default_live() -> bool {
    true
}

impl ChannelConfig {
    /// Create a live channel configuration
    pub fn new(name: impl Into<String>, ttl_minutes: u64) -> Result<Self, KeyError> {
        let name = name.into();
        validate_channel_name(&name)?;
        Ok(Self {
            name,
            ttl_minutes,
            live: true,
        })
    }

    /// Mark the channel as historical
    pub fn historical(mut self) -> Self {
        self.live = false;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

/// Check that `name` is usable as a single path segment
pub fn validate_channel_name(name: &str) -> Result<(), KeyError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_CHANNEL_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidChannelName(name.to_string()))
    }
}

/// Source of channel configuration
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// All known channels
    async fn channels(&self) -> Vec<ChannelConfig>;

    /// Configuration of one channel
    async fn get(&self, name: &str) -> Option<ChannelConfig>;

    /// Whether the channel exists
    async fn exists(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }
}

/// Registry backed by an in-process map
#[derive(Debug, Default)]
pub struct StaticChannelRegistry {
    channels: DashMap<String, ChannelConfig>,
}

impl StaticChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: impl IntoIterator<Item = ChannelConfig>) -> Self {
        let registry = Self::new();
        for config in configs {
            registry.upsert(config);
        }
        registry
    }

    /// Insert or replace a channel's configuration
    pub fn upsert(&self, config: ChannelConfig) {
        self.channels.insert(config.name.clone(), config);
    }

    pub fn remove(&self, name: &str) -> Option<ChannelConfig> {
        self.channels.remove(name).map(|(_, config)| config)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelRegistry for StaticChannelRegistry {
    async fn channels(&self) -> Vec<ChannelConfig> {
        let mut all: Vec<_> = self.channels.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    async fn get(&self, name: &str) -> Option<ChannelConfig> {
        self.channels.get(name).map(|e| e.value().clone())
    }
}
