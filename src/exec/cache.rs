// src/exec/cache.rs

//! Build cache consulted before nodes with a cache key are executed.
//!
//! Entries are addressed by a blake3 hash of the node identity and its
//! declared fingerprint, so changing either one invalidates the entry.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info, warn};

use crate::dag::WorkNode;

/// Default on-disk location of the file cache, relative to the project root.
pub const CACHE_DIR_PATH: &str = ".rundag/cache";

/// Compute the cache key for a node, or `None` if it declares no fingerprint.
pub fn cache_key_for(node: &WorkNode) -> Option<String> {
    let fingerprint = node.cache_key()?;
    let mut hasher = Hasher::new();
    hasher.update(node.id().as_bytes());
    hasher.update(&[0]);
    hasher.update(fingerprint.as_bytes());
    Some(hasher.finalize().to_hex().to_string())
}

/// Abstract storage for cache entries.
pub trait BuildCache: Send + Sync {
    fn contains(&self, key: &str) -> Result<bool>;
    /// Copy the entry for `key` into `sink`. Returns `false` on a miss.
    fn load(&self, key: &str, sink: &mut dyn Write) -> Result<bool>;
    fn store(&self, key: &str, source: &mut dyn Read) -> Result<()>;
}

/// Stores entries in memory only.
#[derive(Debug, Default)]
pub struct MemoryBuildCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BuildCache for MemoryBuildCache {
    fn contains(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.contains_key(key))
    }

    fn load(&self, key: &str, sink: &mut dyn Write) -> Result<bool> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(bytes) => {
                sink.write_all(bytes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn store(&self, key: &str, source: &mut dyn Read) -> Result<()> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(())
    }
}

/// Stores one file per entry under a cache directory.
#[derive(Debug, Clone)]
pub struct FileBuildCache {
    root: PathBuf,
}

impl FileBuildCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BuildCache for FileBuildCache {
    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entry_path(key).is_file())
    }

    fn load(&self, key: &str, sink: &mut dyn Write) -> Result<bool> {
        let path = self.entry_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("opening cache entry {:?}", path));
            }
        };
        io::copy(&mut file, sink).with_context(|| format!("reading cache entry {:?}", path))?;
        Ok(true)
    }

    fn store(&self, key: &str, source: &mut dyn Read) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache directory {:?}", self.root))?;

        // Write then rename so readers never observe a partial entry.
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        {
            let mut file =
                File::create(&tmp).with_context(|| format!("creating cache entry {:?}", tmp))?;
            io::copy(source, &mut file)
                .with_context(|| format!("writing cache entry {:?}", tmp))?;
            file.flush()?;
        }
        fs::rename(&tmp, &path).with_context(|| format!("committing cache entry {:?}", path))?;
        debug!(key = %key, path = ?path, "stored cache entry (file)");
        Ok(())
    }
}

/// Loads and stores node entries against a [`BuildCache`].
///
/// Cache problems never fail a node: a broken load is a miss, a broken store
/// is logged and ignored.
#[derive(Clone)]
pub struct BuildCacheController {
    cache: Arc<dyn BuildCache>,
}

impl BuildCacheController {
    pub fn new(cache: Arc<dyn BuildCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn BuildCache> {
        &self.cache
    }

    /// Whether `node` can be satisfied from the cache.
    pub fn try_load(&self, node: &WorkNode) -> bool {
        let Some(key) = cache_key_for(node) else {
            return false;
        };

        let mut entry = Vec::new();
        match self.cache.load(&key, &mut entry) {
            Ok(true) if entry == entry_contents(node) => {
                info!(node = %node.id(), key = %key, "up to date; loaded from build cache");
                true
            }
            Ok(true) => {
                warn!(node = %node.id(), key = %key, "cache entry does not match node; ignoring");
                false
            }
            Ok(false) => {
                debug!(node = %node.id(), key = %key, "build cache miss");
                false
            }
            Err(err) => {
                warn!(node = %node.id(), error = %err, "failed to load from build cache");
                false
            }
        }
    }

    /// Record a successful execution of `node`.
    pub fn store(&self, node: &WorkNode) {
        let Some(key) = cache_key_for(node) else {
            return;
        };

        let contents = entry_contents(node);
        if let Err(err) = self.cache.store(&key, &mut contents.as_slice()) {
            warn!(node = %node.id(), error = %err, "failed to store in build cache");
        } else {
            debug!(node = %node.id(), key = %key, "stored in build cache");
        }
    }
}

fn entry_contents(node: &WorkNode) -> Vec<u8> {
    format!(
        "node={}\nfingerprint={}\n",
        node.id(),
        node.cache_key().unwrap_or_default()
    )
    .into_bytes()
}
