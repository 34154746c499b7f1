//! Node configuration loaded from TOML

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use hub_core::{ChannelConfig, validate_channel_name};
use hub_logging::LogConfig;
use hub_spoke::{FileSpokeStoreConfig, TtlConfig};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "spoke-node.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root of the spoke file hierarchy
    pub storage_path: PathBuf,
    /// fsync each item before it becomes visible
    pub sync_writes: bool,
    /// How far stable time trails the clock
    pub stable_lag_secs: u64,
    pub sweep: SweepConfig,
    pub log: LogConfig,
    pub channels: Vec<ChannelConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data/spoke"),
            sync_writes: true,
            stable_lag_secs: 5,
            sweep: SweepConfig::default(),
            log: LogConfig::default(),
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub grace_secs: u64,
    /// Age-sweep live channels every this many cycles (0 = never)
    pub reconcile_every: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            grace_secs: 3,
            reconcile_every: 60,
        }
    }
}

impl SweepConfig {
    pub fn ttl_config(&self) -> TtlConfig {
        TtlConfig {
            enabled: self.enabled,
            ..TtlConfig::default()
        }
        .with_interval(Duration::from_secs(self.interval_secs))
        .with_grace(Duration::from_secs(self.grace_secs))
        .with_reconcile_every(self.reconcile_every)
    }
}

impl NodeConfig {
    /// Load config from `path`, or defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("loading {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject channel names that cannot be a path segment, and duplicates
    pub fn validate(&self) -> Result<()> {
        if self.sweep.interval_secs == 0 {
            bail!("sweep.interval_secs must be positive");
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            validate_channel_name(&channel.name)?;
            if !seen.insert(channel.name.as_str()) {
                bail!("channel {} is configured twice", channel.name);
            }
        }
        Ok(())
    }

    pub fn store_config(&self) -> FileSpokeStoreConfig {
        FileSpokeStoreConfig::new(&self.storage_path).with_sync_writes(self.sync_writes)
    }

    pub fn stable_lag(&self) -> Duration {
        Duration::from_secs(self.stable_lag_secs)
    }
}
