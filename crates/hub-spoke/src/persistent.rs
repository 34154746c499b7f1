//! File-hierarchy spoke store
//!
//! Items live one per file under `root/channel/YYYY/MM/DD/HH/mm/` (see
//! [`crate::layout`]). Navigation never consults an index: `next` and
//! `previous` look in the item's minute directory first, then climb the
//! hierarchy and descend into the nearest non-empty sibling.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, trace, warn};

use hub_core::{ContentKey, Direction, TimeBucket, key::random_hash, validate_channel_name};

use crate::SpokeStore;
use crate::error::StorageError;
use crate::layout::{self, Level};

/// Raw path written on open to prove the root is writable
pub const STARTUP_MARKER: &str = "hub-startup/last";

type WalkFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Configuration for the file store
#[derive(Debug, Clone)]
pub struct FileSpokeStoreConfig {
    /// Root directory of all channels
    pub storage_path: PathBuf,
    /// Whether to fsync each item before it becomes visible
    pub sync_writes: bool,
}

impl FileSpokeStoreConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            sync_writes: true,
        }
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

impl Default for FileSpokeStoreConfig {
    fn default() -> Self {
        Self::new("./data/spoke")
    }
}

/// Spoke store backed by a directory tree
#[derive(Debug, Clone)]
pub struct FileSpokeStore {
    /// Root directory of all channels
    root: PathBuf,
    /// Whether to fsync writes
    sync_writes: bool,
}

impl FileSpokeStore {
    /// Open a store at `config.storage_path`
    ///
    /// Creates the root if needed and writes a startup marker file. Fails if
    /// the root is not writable.
    pub async fn open(config: FileSpokeStoreConfig) -> Result<Self, StorageError> {
        let root = config.storage_path;
        fs::create_dir_all(&root).await?;

        let store = Self {
            root,
            sync_writes: config.sync_writes,
        };

        let stamp = Utc::now().timestamp_millis().to_string();
        store
            .write_raw(STARTUP_MARKER, stamp.as_bytes())
            .await
            .map_err(|e| StorageError::io(format!("spoke root is not writable: {e}")))?;

        info!(path = ?store.root, sync_writes = store.sync_writes, "Opened file spoke store");
        Ok(store)
    }

    /// Open with default options at `storage_path`
    pub async fn new(storage_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open(FileSpokeStoreConfig::new(storage_path.as_ref())).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a file by raw URL-style path
    pub async fn write_raw(&self, url: &str, payload: &[u8]) -> Result<(), StorageError> {
        let path = layout::url_path(&self.root, url);
        self.write_file(&path, payload).await
    }

    /// Read a file by raw URL-style path
    pub async fn read_raw(&self, url: &str) -> Option<Bytes> {
        let path = layout::url_path(&self.root, url);
        self.read_file(&path).await
    }

    /// Write to a hidden temp file in the target directory, then rename
    async fn write_file(&self, path: &Path, payload: &[u8]) -> Result<(), StorageError> {
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::io(format!("no parent directory for {}", path.display())))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::io(format!("no file name in {}", path.display())))?;
        let temp_path = parent.join(format!(".{name}.{}.tmp", random_hash()));

        fs::create_dir_all(parent).await?;
        let mut file = match File::create(&temp_path).await {
            Ok(file) => file,
            // a sweep may have removed the directory in between
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(parent).await?;
                File::create(&temp_path).await?
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(payload).await?;
            if self.sync_writes {
                file.sync_all().await?;
            }
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "Write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        trace!(path = %path.display(), bytes = payload.len(), "Wrote file");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Option<Bytes> {
        match fs::read(path).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File not found");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to read file");
                None
            }
        }
    }

    /// Sorted names in `dir` accepted by `keep`; missing directories are empty
    async fn list(&self, dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Unable to list directory");
                return Vec::new();
            }
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let file_name = entry.file_name();
                    if let Some(name) = file_name.to_str()
                        && keep(name)
                    {
                        names.push(name.to_string());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Directory listing interrupted");
                    break;
                }
            }
        }
        names.sort();
        names
    }

    fn dir_of(channel_dir: &Path, segments: &[String]) -> PathBuf {
        let mut dir = channel_dir.to_path_buf();
        dir.extend(segments);
        dir
    }

    fn decode(segments: &[String], name: &str) -> Option<ContentKey> {
        match layout::decode_item(segments, name) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(dirs = ?segments, name, error = %e, "Skipping undecodable item");
                None
            }
        }
    }

    /// First (or last) item at or below the directory `prefix`
    fn edge_under<'a>(
        &'a self,
        channel_dir: &'a Path,
        prefix: Vec<String>,
        direction: Direction,
    ) -> WalkFuture<'a, Option<ContentKey>> {
        Box::pin(async move {
            let dir = Self::dir_of(channel_dir, &prefix);
            let Some(level) = Level::at(prefix.len()) else {
                let names = self.list(&dir, layout::is_item_name).await;
                let decode = |name: &String| Self::decode(&prefix, name);
                return match direction {
                    Direction::Next => names.iter().find_map(decode),
                    Direction::Previous => names.iter().rev().find_map(decode),
                };
            };

            let mut children = self.list(&dir, |n| level.matches(n)).await;
            if direction == Direction::Previous {
                children.reverse();
            }
            for child in children {
                let mut path = prefix.clone();
                path.push(child);
                if let Some(key) = self.edge_under(channel_dir, path, direction).await {
                    return Some(key);
                }
            }
            None
        })
    }

    /// Nearest item strictly after (or before) `key`
    async fn adjacent(&self, channel: &str, key: &ContentKey, direction: Direction) -> Option<ContentKey> {
        if validate_channel_name(channel).is_err() {
            warn!(channel, "Invalid channel name");
            return None;
        }
        let channel_dir = layout::channel_dir(&self.root, channel);
        let segments = layout::minute_segments(key);

        // same minute
        let current = layout::file_name(key);
        let names = self
            .list(&Self::dir_of(&channel_dir, &segments), layout::is_item_name)
            .await;
        let candidates: Vec<&String> = match direction {
            Direction::Next => names.iter().filter(|n| **n > current).collect(),
            Direction::Previous => names.iter().rev().filter(|n| **n < current).collect(),
        };
        for name in candidates {
            if let Some(found) = Self::decode(&segments, name) {
                return Some(found);
            }
        }

        // climb from the minute level towards the year level
        for level in Level::ALL.iter().rev() {
            let depth = level.depth() - 1;
            let parent = &segments[..depth];
            let own = &segments[depth];
            let siblings = self
                .list(&Self::dir_of(&channel_dir, parent), |n| level.matches(n))
                .await;
            let beyond: Vec<String> = match direction {
                Direction::Next => siblings.into_iter().filter(|s| s > own).collect(),
                Direction::Previous => siblings.into_iter().rev().filter(|s| s < own).collect(),
            };
            for sibling in beyond {
                let mut path = parent.to_vec();
                path.push(sibling);
                if let Some(found) = self.edge_under(&channel_dir, path, direction).await {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Collect keys at or below `prefix` whose file names pass `holds`
    fn collect_keys<'a>(
        &'a self,
        channel_dir: &'a Path,
        prefix: Vec<String>,
        holds: &'a (dyn Fn(&str) -> bool + Sync),
        out: &'a mut Vec<ContentKey>,
    ) -> WalkFuture<'a, ()> {
        Box::pin(async move {
            let dir = Self::dir_of(channel_dir, &prefix);
            let Some(level) = Level::at(prefix.len()) else {
                for name in self.list(&dir, holds).await {
                    if let Some(key) = Self::decode(&prefix, &name) {
                        out.push(key);
                    }
                }
                return;
            };
            for child in self.list(&dir, |n| level.matches(n)).await {
                let mut path = prefix.clone();
                path.push(child);
                self.collect_keys(channel_dir, path, holds, out).await;
            }
        })
    }

    /// Collect the largest directories below `prefix` that end by `cutoff`
    fn collect_expired<'a>(
        &'a self,
        channel_dir: &'a Path,
        prefix: Vec<String>,
        cutoff: DateTime<Utc>,
        out: &'a mut Vec<TimeBucket>,
    ) -> WalkFuture<'a, ()> {
        Box::pin(async move {
            let Some(level) = Level::at(prefix.len()) else {
                return;
            };
            let dir = Self::dir_of(channel_dir, &prefix);
            for child in self.list(&dir, |n| level.matches(n)).await {
                let mut path = prefix.clone();
                path.push(child);
                let Some((start, end)) = layout::directory_range(&path) else {
                    warn!(dirs = ?path, "Skipping unrecognized directory");
                    continue;
                };
                if start >= cutoff {
                    break;
                }
                if end <= cutoff && level != Level::Year {
                    if let Ok(bucket) = TimeBucket::parse(&path.join("/")) {
                        out.push(bucket);
                    }
                } else if level != Level::Minute {
                    self.collect_expired(channel_dir, path, cutoff, out).await;
                }
            }
        })
    }
}

#[async_trait]
impl SpokeStore for FileSpokeStore {
    #[instrument(skip(self, key, payload), fields(key = %key, bytes = payload.len()))]
    async fn write(
        &self,
        channel: &str,
        key: &ContentKey,
        payload: &[u8],
    ) -> Result<(), StorageError> {
        validate_channel_name(channel).map_err(|_| StorageError::InvalidChannel(channel.to_string()))?;
        let path = layout::item_path(&self.root, channel, key);
        self.write_file(&path, payload).await
    }

    async fn read(&self, channel: &str, key: &ContentKey) -> Option<Bytes> {
        if validate_channel_name(channel).is_err() {
            warn!(channel, "Invalid channel name");
            return None;
        }
        self.read_file(&layout::item_path(&self.root, channel, key)).await
    }

    #[instrument(skip(self, bucket), fields(bucket = ?bucket.map(TimeBucket::url)))]
    async fn delete(&self, channel: &str, bucket: Option<&TimeBucket>) -> Result<u64, StorageError> {
        validate_channel_name(channel).map_err(|_| StorageError::InvalidChannel(channel.to_string()))?;
        let location = layout::bucket_location(&self.root, channel, bucket);

        if location.name_prefix.is_some() {
            let mut removed = 0;
            for name in self.list(&location.dir, |n| location.holds(n)).await {
                match fs::remove_file(location.dir.join(&name)).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            debug!(removed, "Deleted second bucket");
            return Ok(removed);
        }

        let channel_dir = layout::channel_dir(&self.root, channel);
        let mut keys = Vec::new();
        self.collect_keys(&channel_dir, location.segments.clone(), &layout::is_item_name, &mut keys)
            .await;

        match fs::remove_dir_all(&location.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                warn!(path = %location.dir.display(), error = %e, "Unable to delete");
                return Err(e.into());
            }
        }
        debug!(removed = keys.len(), path = %location.dir.display(), "Deleted directory");
        Ok(keys.len() as u64)
    }

    async fn next(&self, channel: &str, key: &ContentKey) -> Option<ContentKey> {
        self.adjacent(channel, key, Direction::Next).await
    }

    async fn previous(&self, channel: &str, key: &ContentKey) -> Option<ContentKey> {
        self.adjacent(channel, key, Direction::Previous).await
    }

    async fn first(&self, channel: &str) -> Option<ContentKey> {
        validate_channel_name(channel).ok()?;
        let channel_dir = layout::channel_dir(&self.root, channel);
        self.edge_under(&channel_dir, Vec::new(), Direction::Next).await
    }

    async fn last(&self, channel: &str) -> Option<ContentKey> {
        validate_channel_name(channel).ok()?;
        let channel_dir = layout::channel_dir(&self.root, channel);
        self.edge_under(&channel_dir, Vec::new(), Direction::Previous).await
    }

    async fn keys_in_bucket(&self, channel: &str, bucket: Option<&TimeBucket>) -> Vec<ContentKey> {
        if validate_channel_name(channel).is_err() {
            warn!(channel, "Invalid channel name");
            return Vec::new();
        }
        let channel_dir = layout::channel_dir(&self.root, channel);
        let location = layout::bucket_location(&self.root, channel, bucket);
        let holds = |name: &str| location.holds(name);
        let mut keys = Vec::new();
        self.collect_keys(&channel_dir, location.segments.clone(), &holds, &mut keys)
            .await;
        keys.sort();
        keys
    }

    async fn expired_buckets(&self, channel: &str, cutoff: DateTime<Utc>) -> Vec<TimeBucket> {
        if validate_channel_name(channel).is_err() {
            return Vec::new();
        }
        let channel_dir = layout::channel_dir(&self.root, channel);
        let mut buckets = Vec::new();
        self.collect_expired(&channel_dir, Vec::new(), cutoff, &mut buckets)
            .await;
        buckets
    }
}
