//! Key-store implementations
//!
//! On the device the session key lives in an NVS partition that is separate
//! from the data volume. [`FileKeyStore`] reproduces that on a host with a
//! dedicated directory readable only by the owner; [`MemoryKeyStore`] is for
//! tests and for devices with no secure store at all.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::{StorageError, StorageResult};
use crate::traits::KeyStore;

/// Blob-per-file store in its own directory
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Open (creating if needed) the store directory
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        restrict(&dir, 0o700)?;
        Ok(Self { dir })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", name))
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn put(&mut self, name: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.blob_path(name);
        fs::write(&path, value).map_err(|e| StorageError::io(&path, e))?;
        restrict(&path, 0o600)?;
        debug!("key store: wrote {} ({} bytes)", name, value.len());
        Ok(())
    }
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> StorageResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| StorageError::io(path, e))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> StorageResult<()> {
    Ok(())
}

/// Volatile store
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(name).cloned())
    }

    fn put(&mut self, name: &str, value: &[u8]) -> StorageResult<()> {
        self.blobs.insert(name.to_owned(), value.to_vec());
        Ok(())
    }
}
