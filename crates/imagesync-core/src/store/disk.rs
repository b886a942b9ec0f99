//! On-disk key-value storage backed by a sled database.
//!
//! Each key is its own record, so storing one image writes only that image.
//! Batches go through `apply_batch` and are atomic; every batch is flushed
//! to disk before it is reported as done.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{KvBackend, Mutation, StoreError};

/// Directory name under the platform data directory
const APP_NAME: &str = "imagesync";

/// Database directory name
const STORE_DIR: &str = "store";

/// Page cache limit. Image payloads are read back one at a time, so a
/// small cache is enough.
const CACHE_CAPACITY_BYTES: u64 = 16 * 1024 * 1024;

pub struct SledBackend {
    db: sled::Db,
    path: PathBuf,
}

impl SledBackend {
    /// Open or create the database directory at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let db = sled::Config::new()
            .path(&path)
            .cache_capacity(CACHE_CAPACITY_BYTES)
            // Writes are flushed in `apply`; no background flusher needed
            .flush_every_ms(None)
            .open()?;
        info!(path = %path.display(), "Store database opened");
        Ok(Self { db, path })
    }

    /// `<data dir>/imagesync/store`, if the platform has a data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(APP_NAME).join(STORE_DIR))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode(key: &str, raw: &[u8]) -> Result<String, StoreError> {
        String::from_utf8(raw.to_vec()).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }

    fn decode_key(raw: &[u8]) -> Result<String, StoreError> {
        String::from_utf8(raw.to_vec()).map_err(|source| StoreError::Corrupt {
            key: String::from_utf8_lossy(raw).into_owned(),
            source,
        })
    }
}

#[async_trait]
impl KvBackend for SledBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.db.get(key)? {
            Some(raw) => Ok(Some(Self::decode(key, &raw)?)),
            None => Ok(None),
        }
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for mutation in batch {
            match mutation {
                Mutation::Set { key, value } => sled_batch.insert(key.as_bytes(), value.as_bytes()),
                Mutation::Remove { key } => sled_batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        self.db.flush()?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.db
            .iter()
            .keys()
            .map(|key| Self::decode_key(&key?))
            .collect()
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|key| Self::decode_key(&key?))
            .collect()
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.db.contains_key(key)?)
    }
}
