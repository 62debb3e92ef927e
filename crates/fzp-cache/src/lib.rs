//! Record store reader.
//!
//! The cache store is a single file holding one packed record whose top-level
//! pairs map pool names to pool configuration records. This crate turns the
//! file (or an already-read byte buffer) into a sequence of
//! `(name, RecList)` pairs, failing closed on anything that is not a nested
//! record at the top level.

use std::path::{Path, PathBuf};

use fzp_error::{FzpError, Result};
use fzp_record::{RecList, RecValue, unpack};
use tracing::{debug, info};

/// Default location of the persisted pool cache.
pub const DEFAULT_CACHE_PATH: &str = "/etc/zfs/zpool.cache";

/// Environment variable overriding the cache location.
pub const CACHE_PATH_ENV: &str = "FZP_CACHEFILE";

/// Resolve the effective cache path: explicit argument, then environment,
/// then the default.
#[must_use]
pub fn resolve_cache_path(explicit: Option<&Path>) -> PathBuf {
    let env_path = std::env::var(CACHE_PATH_ENV).ok();
    resolve_from(explicit, env_path.as_deref())
}

fn resolve_from(explicit: Option<&Path>, env_path: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(env_path) = env_path {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }
    PathBuf::from(DEFAULT_CACHE_PATH)
}

/// A parsed cache snapshot: named pool configuration records in store order.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    entries: Vec<(String, RecList)>,
}

impl CacheStore {
    /// Read and parse the cache file at `path`.
    ///
    /// A missing file is an I/O error; an empty file is an empty store.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        debug!(path = %path.display(), len = bytes.len(), "read cache store");
        Self::parse(&bytes)
    }

    /// Parse a raw cache buffer.
    ///
    /// Every top-level pair must be a nested record; a scalar at the top
    /// level means the store is corrupt and the whole parse fails.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let root = unpack(bytes)?;
        let mut entries = Vec::with_capacity(root.len());
        for (name, value) in root.iter() {
            match value {
                RecValue::List(record) => {
                    info!(pool = %name, "cache store has pool");
                    entries.push((name.to_owned(), record.clone()));
                }
                other => {
                    return Err(FzpError::MalformedCache(format!(
                        "top-level entry '{name}' is not a pool record (type tag {})",
                        other.tag()
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    /// Number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in store order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecList)> {
        self.entries
            .iter()
            .map(|(name, record)| (name.as_str(), record))
    }

    /// Consume the store, yielding owned entries.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, RecList)> {
        self.entries
    }
}
