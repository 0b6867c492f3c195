//! Volume capacity and usage

use std::path::PathBuf;

use walkdir::WalkDir;

use crate::errors::{StorageError, StorageResult};

/// Snapshot of volume usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeUsage {
    /// Capacity in bytes
    pub total_bytes: u64,
    /// Bytes in use
    pub used_bytes: u64,
}

impl VolumeUsage {
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }

    /// True when usage is strictly above `percent` of capacity
    pub fn exceeds_percent(&self, percent: u8) -> bool {
        self.total_bytes > 0
            && u128::from(self.used_bytes) * 100 > u128::from(self.total_bytes) * u128::from(percent)
    }

    /// Bytes that must stay free to honour a `percent` floor
    pub fn floor_bytes(&self, percent: u8) -> u64 {
        (u128::from(self.total_bytes) * u128::from(percent.min(100)) / 100) as u64
    }
}

/// Anything that can report capacity and usage of the data volume
pub trait Volume: Send + Sync {
    fn usage(&self) -> StorageResult<VolumeUsage>;
}

/// Fixed-capacity partition rooted at a directory
///
/// Usage is the sum of file sizes below the root, so the partition behaves
/// like a dedicated flash volume even when the root lives on a larger disk.
#[derive(Debug, Clone)]
pub struct QuotaVolume {
    root: PathBuf,
    capacity_bytes: u64,
}

impl QuotaVolume {
    pub fn new(root: impl Into<PathBuf>, capacity_bytes: u64) -> Self {
        Self {
            root: root.into(),
            capacity_bytes,
        }
    }
}

impl Volume for QuotaVolume {
    fn usage(&self) -> StorageResult<VolumeUsage> {
        let mut used_bytes = 0u64;
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| StorageError::Volume(e.to_string()))?;
            if entry.file_type().is_file() {
                let meta = entry
                    .metadata()
                    .map_err(|e| StorageError::Volume(e.to_string()))?;
                used_bytes += meta.len();
            }
        }
        Ok(VolumeUsage {
            total_bytes: self.capacity_bytes,
            used_bytes,
        })
    }
}
