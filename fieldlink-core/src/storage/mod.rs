//! Flash Volume Management
//!
//! ## Overview
//!
//! The device has one flash volume and no operator. Everything that must
//! survive a power cut lives here: session state, undelivered readings and
//! the archive of delivered ones. This module owns the directory layout and
//! every file operation on it; it knows nothing about networks or tokens.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── logs/
//! ├── secure/            session.dat
//! ├── pending/ambient/   <stamp>_env.json
//! ├── pending/capture/   <stamp>_thermal.json, <stamp>_visual.jpg
//! ├── archive/ambient/
//! └── archive/capture/
//! ```
//!
//! All directories are created at startup. If any of them cannot be created
//! the manager stays *unavailable*: every call fails fast with
//! [`StorageError::Unavailable`] and the device runs memory-only.
//!
//! ## Write Semantics
//!
//! Writes go to a hidden temporary file first and are renamed into place, so
//! a reader never observes a half-written file and an overwrite either fully
//! happens or not at all. Hidden files are invisible to [`list`].
//!
//! [`list`]: StorageManager::list

pub mod eviction;
pub mod keystore;
pub mod layout;
pub mod naming;
pub mod volume;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, error, info};

use crate::constants::DEFAULT_HIGH_WATER_PERCENT;
use crate::errors::{StorageError, StorageResult};

pub use eviction::{EvictionPolicy, EvictionReport, FileRecord};
pub use keystore::{FileKeyStore, MemoryKeyStore};
pub use layout::Area;
pub use naming::{parse_stamp, CaptureStamp, EntryKind, NameOrder};
pub use volume::{QuotaVolume, Volume, VolumeUsage};

/// Owner of the flash volume
pub struct StorageManager {
    root: PathBuf,
    volume: Box<dyn Volume>,
    available: bool,
    high_water_percent: u8,
}

impl StorageManager {
    /// Create a manager; it stays unavailable until [`init`](Self::init) succeeds
    pub fn new(root: impl Into<PathBuf>, volume: Box<dyn Volume>) -> Self {
        Self {
            root: root.into(),
            volume,
            available: false,
            high_water_percent: DEFAULT_HIGH_WATER_PERCENT,
        }
    }

    /// Usage percentage above which [`manage`](Self::manage) starts scanning
    pub fn with_high_water_percent(mut self, percent: u8) -> Self {
        self.high_water_percent = percent.min(100);
        self
    }

    /// Create the directory layout (idempotent)
    pub fn init(&mut self) -> StorageResult<()> {
        for area in Area::ALL {
            let dir = self.root.join(area.relative_path());
            if let Err(e) = fs::create_dir_all(&dir) {
                error!("storage: cannot create {}: {}", dir.display(), e);
                self.available = false;
                return Err(StorageError::io(dir, e));
            }
        }
        self.available = true;
        info!("storage: ready at {}", self.root.display());
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a managed directory
    pub fn dir(&self, area: Area) -> PathBuf {
        self.root.join(area.relative_path())
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    /// Atomically create or replace `name` inside `area`
    pub fn write(&self, area: Area, name: &str, bytes: &[u8]) -> StorageResult<PathBuf> {
        self.ensure_available()?;
        let dir = self.dir(area);
        let path = dir.join(name);
        let tmp = dir.join(format!(".{}.tmp", name));

        fs::write(&tmp, bytes).map_err(|e| StorageError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(path, e));
        }
        debug!("storage: wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
        self.ensure_available()?;
        fs::read(path).map_err(|e| StorageError::io(path, e))
    }

    pub fn read_to_string(&self, path: &Path) -> StorageResult<String> {
        self.ensure_available()?;
        fs::read_to_string(path).map_err(|e| StorageError::io(path, e))
    }

    /// True when `name` exists inside `area`
    pub fn contains(&self, area: Area, name: &str) -> bool {
        self.available && self.dir(area).join(name).exists()
    }

    pub fn remove(&self, path: &Path) -> StorageResult<()> {
        self.ensure_available()?;
        fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }

    /// Move a file into another managed directory, keeping its name
    pub fn relocate(&self, path: &Path, to: Area) -> StorageResult<PathBuf> {
        self.ensure_available()?;
        let name = path.file_name().ok_or_else(|| {
            StorageError::io(path, std::io::Error::from(std::io::ErrorKind::InvalidInput))
        })?;
        let dest = self.dir(to).join(name);
        fs::rename(path, &dest).map_err(|e| StorageError::io(path, e))?;
        Ok(dest)
    }

    /// Visible regular files of a directory, in capture order
    pub fn list(&self, area: Area) -> StorageResult<Vec<PathBuf>> {
        self.ensure_available()?;
        let dir = self.dir(area);
        let entries = fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && !is_hidden {
                files.push(entry.path());
            }
        }
        files.sort_by_cached_key(|path| (NameOrder::of_path(path), path.clone()));
        Ok(files)
    }

    pub fn usage(&self) -> StorageResult<VolumeUsage> {
        self.ensure_available()?;
        self.volume.usage()
    }

    /// Cap disk usage by evicting old archive and log files
    ///
    /// A no-op unless usage is above the high-water mark. `now` is the wall
    /// clock; when unsynced only the space phase runs.
    pub fn manage(
        &self,
        policy: EvictionPolicy,
        now: Option<NaiveDateTime>,
    ) -> StorageResult<EvictionReport> {
        let usage = self.usage()?;
        if !usage.exceeds_percent(self.high_water_percent) {
            debug!(
                "storage: {} of {} bytes used, below high-water mark",
                usage.used_bytes, usage.total_bytes
            );
            return Ok(EvictionReport {
                floor_met: usage.free_bytes() >= usage.floor_bytes(policy.min_free_percent),
                ..Default::default()
            });
        }

        let dirs: Vec<(Area, PathBuf)> = Area::EVICTABLE
            .iter()
            .map(|&area| (area, self.dir(area)))
            .collect();
        Ok(eviction::evict(&dirs, usage, policy, now))
    }
}
