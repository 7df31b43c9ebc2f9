//! Embedded storage backed by sled

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::debug;

use super::{Storage, StorageError, StorageOptions, StorageResult};

/// Sled-backed storage implementation
#[derive(Debug, Clone)]
pub struct SledStorage {
    /// Open sled database
    db: sled::Db,
    /// Directory holding the database files
    path: PathBuf,
    /// Storage options
    options: StorageOptions,
}

impl SledStorage {
    /// Open (or create) a sled database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::open_with_options(path, StorageOptions::default())
    }

    /// Open a sled database with explicit options
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: StorageOptions) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if options.create_dirs {
            std::fs::create_dir_all(&path)?;
        }
        let db = sled::open(&path)?;
        debug!("Opened sled storage at {}", path.display());
        Ok(Self { db, path, options })
    }
}

#[async_trait]
impl Storage for SledStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.db.insert(key.as_bytes(), data)?;
        if self.options.sync_write {
            self.db.flush_async().await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.db
            .get(key.as_bytes())?
            .map(|value| value.to_vec())
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.db.remove(key.as_bytes())?;
        if self.options.sync_write {
            self.db.flush_async().await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.db.contains_key(key.as_bytes())?)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for key in self.db.scan_prefix(prefix.as_bytes()).keys() {
            let key = key?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Other(format!("Non UTF-8 key: {}", e)))?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn base_path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}
