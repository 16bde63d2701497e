//! Persistent transform cache using sled.
//!
//! Keys are digests of everything that determines a transform result (module
//! content hash, rule fingerprint); values are opaque serialized outputs. The
//! engine owns the encoding, this crate only stores bytes.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sled::Db;
use std::path::Path;

pub struct PersistentCache {
    db: Db,
}

impl PersistentCache {
    /// Open or create a cache database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open transform cache at {}", path.display()))?;
        tracing::debug!("opened transform cache at {}", path.display());
        Ok(Self { db })
    }

    /// Derive a cache key from the parts that identify a cached value.
    pub fn key_for(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Store a key-value pair
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Retrieve a value by key
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Remove a key
    pub fn remove(&self, key: &str) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Block until all pending writes are on disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
