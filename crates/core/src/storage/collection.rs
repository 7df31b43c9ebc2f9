//! Typed collections on top of the key-value [`Storage`] trait
//!
//! A collection stores each record as JSON under `<collection>/<key>` and keeps
//! a monotonically increasing sequence under `_seq/<collection>` for numeric ids.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{JsonStorage, Storage, StorageError, StorageResult};

/// A record that can be persisted in a [`Collection`]
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection (key prefix) name
    const COLLECTION: &'static str;

    /// Key of this record within its collection
    fn key(&self) -> String;
}

/// Format a numeric id so that lexicographic key order matches numeric order
pub fn id_key(id: u64) -> String {
    format!("{:020}", id)
}

/// Typed, key-ordered table of records
pub struct Collection<T: Record> {
    storage: Arc<dyn Storage>,
    seq_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Collection<T> {
    /// Create a collection view over the given storage
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            seq_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    fn prefix() -> String {
        format!("{}/", T::COLLECTION)
    }

    fn record_key(key: &str) -> String {
        format!("{}/{}", T::COLLECTION, key)
    }

    fn seq_key() -> String {
        format!("_seq/{}", T::COLLECTION)
    }

    /// Allocate the next numeric id (starting at 1)
    pub async fn next_id(&self) -> StorageResult<u64> {
        let _guard = self.seq_lock.lock().await;
        let current: u64 = match self.storage.get_json(&Self::seq_key()).await {
            Ok(value) => value,
            Err(StorageError::KeyNotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        let next = current + 1;
        self.storage.put_json(&Self::seq_key(), &next).await?;
        Ok(next)
    }

    /// Insert or overwrite a record
    pub async fn put(&self, record: &T) -> StorageResult<()> {
        self.storage.put_json(&Self::record_key(&record.key()), record).await
    }

    /// Fetch a record by its raw key
    pub async fn get_by_key(&self, key: &str) -> StorageResult<Option<T>> {
        match self.storage.get_json(&Self::record_key(key)).await {
            Ok(record) => Ok(Some(record)),
            Err(StorageError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch a record by numeric id
    pub async fn get(&self, id: u64) -> StorageResult<Option<T>> {
        self.get_by_key(&id_key(id)).await
    }

    /// Delete a record by its raw key; returns whether it existed
    pub async fn delete_by_key(&self, key: &str) -> StorageResult<bool> {
        let full_key = Self::record_key(key);
        if !self.storage.exists(&full_key).await? {
            return Ok(false);
        }
        self.storage.delete(&full_key).await?;
        Ok(true)
    }

    /// Delete a record by numeric id; returns whether it existed
    pub async fn delete(&self, id: u64) -> StorageResult<bool> {
        self.delete_by_key(&id_key(id)).await
    }

    /// All records in key order
    pub async fn all(&self) -> StorageResult<Vec<T>> {
        let mut keys = self.storage.list(&Self::prefix()).await?;
        keys.sort();

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.storage.get_json(&key).await {
                Ok(record) => records.push(record),
                // Deleted between list and get
                Err(StorageError::KeyNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// First record matching the predicate, in key order
    pub async fn find<F>(&self, predicate: F) -> StorageResult<Option<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self.all().await?.into_iter().find(|r| predicate(r)))
    }

    /// All records matching the predicate, in key order
    pub async fn filter<F>(&self, predicate: F) -> StorageResult<Vec<T>>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self.all().await?.into_iter().filter(|r| predicate(r)).collect())
    }

    /// Number of records matching the predicate
    pub async fn count<F>(&self, predicate: F) -> StorageResult<usize>
    where
        F: Fn(&T) -> bool,
    {
        Ok(self.all().await?.iter().filter(|r| predicate(r)).count())
    }

    /// Total number of records
    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.storage.list(&Self::prefix()).await?.len())
    }
}
