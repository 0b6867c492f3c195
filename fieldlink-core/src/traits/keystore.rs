//! Secure key-value blob store port

use crate::errors::StorageResult;

/// Named blob storage kept apart from the data volume (e.g. an NVS partition)
pub trait KeyStore: Send {
    /// Fetch a blob; `Ok(None)` when the name was never written
    fn get(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Create or replace a blob
    fn put(&mut self, name: &str, value: &[u8]) -> StorageResult<()>;
}
