//! Age and space based eviction
//!
//! ## Algorithm
//!
//! Eviction only runs once the volume is above its high-water mark, so a
//! healthy device never scans its archive directories. When it runs, each
//! evictable directory goes through two phases:
//!
//! ```text
//! 1. age:   delete every file whose stamp is older than max_age_days
//! 2. space: while free < min_free_percent of capacity,
//!           delete the oldest remaining file
//! ```
//!
//! Age comes from the filename stamp. Files whose names do not parse have no
//! known age and are left alone by both phases.
//!
//! Deletion failures are logged and the file is skipped; a single stuck file
//! never stops the pass.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};

use super::layout::Area;
use super::naming::{parse_stamp, NameOrder};
use super::volume::VolumeUsage;

/// A file eligible for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute path
    pub path: PathBuf,
    /// Stamp parsed from the filename
    pub timestamp: NaiveDateTime,
    /// Size in bytes
    pub size: u64,
}

/// Eviction limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Files older than this many days are removed
    pub max_age_days: u32,
    /// Free-space floor as percent of capacity
    pub min_free_percent: u8,
}

/// What one `manage` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// False when usage was below the high-water mark and nothing was scanned
    pub triggered: bool,
    /// Files removed by the age phase
    pub deleted_by_age: usize,
    /// Files removed by the space phase
    pub deleted_for_space: usize,
    /// Bytes released by both phases
    pub bytes_freed: u64,
    /// Free space is at or above the floor after the pass
    pub floor_met: bool,
}

impl EvictionReport {
    pub fn deleted(&self) -> usize {
        self.deleted_by_age + self.deleted_for_space
    }
}

/// List the dated files of a directory, oldest first
///
/// Same-second files are ordered by their discriminator, then by path.
pub fn scan(dir: &Path) -> Vec<FileRecord> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("eviction: cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut records: Vec<FileRecord> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            let name = entry.file_name();
            let timestamp = parse_stamp(name.to_str()?)?;
            Some(FileRecord {
                path: entry.path(),
                timestamp,
                size: meta.len(),
            })
        })
        .collect();

    records.sort_by_cached_key(|r| (NameOrder::of_path(&r.path), r.path.clone()));
    records
}

pub(crate) fn evict(
    dirs: &[(Area, PathBuf)],
    usage: VolumeUsage,
    policy: EvictionPolicy,
    now: Option<NaiveDateTime>,
) -> EvictionReport {
    let floor = usage.floor_bytes(policy.min_free_percent);
    let mut free = usage.free_bytes();
    let cutoff = age_cutoff(now, policy.max_age_days);
    let mut report = EvictionReport {
        triggered: true,
        ..Default::default()
    };

    for (area, dir) in dirs {
        let mut survivors = Vec::new();
        for record in scan(dir) {
            if cutoff.is_some_and(|cutoff| record.timestamp < cutoff) {
                if remove(&record) {
                    free += record.size;
                    report.bytes_freed += record.size;
                    report.deleted_by_age += 1;
                }
            } else {
                survivors.push(record);
            }
        }

        for record in survivors {
            if free >= floor {
                break;
            }
            if remove(&record) {
                free += record.size;
                report.bytes_freed += record.size;
                report.deleted_for_space += 1;
            }
        }

        debug!("eviction: {} done, free={} floor={}", area, free, floor);
    }

    report.floor_met = free >= floor;
    if report.deleted() > 0 {
        info!(
            "eviction: removed {} by age, {} for space, {} bytes",
            report.deleted_by_age, report.deleted_for_space, report.bytes_freed
        );
    }
    if !report.floor_met {
        warn!("eviction: candidates exhausted, free {} below floor {}", free, floor);
    }
    report
}

/// Oldest stamp the age phase keeps, or `None` to skip the phase
fn age_cutoff(now: Option<NaiveDateTime>, max_age_days: u32) -> Option<NaiveDateTime> {
    let Some(now) = now else {
        debug!("eviction: wall clock unsynced, skipping age phase");
        return None;
    };
    let cutoff = Duration::try_days(i64::from(max_age_days)).and_then(|age| now.checked_sub_signed(age));
    if cutoff.is_none() {
        debug!("eviction: max age of {} days predates the calendar, skipping age phase", max_age_days);
    }
    cutoff
}

fn remove(record: &FileRecord) -> bool {
    match fs::remove_file(&record.path) {
        Ok(()) => true,
        Err(e) => {
            warn!("eviction: cannot delete {}: {}", record.path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_orders_oldest_first_and_skips_undated() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "20240302_000000_env.json",
            "20240301_000000_env.json",
            "20240301_000000-1_env.json",
            "unsynced-5_env.json",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let names: Vec<String> = scan(dir.path())
            .into_iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "20240301_000000_env.json",
                "20240301_000000-1_env.json",
                "20240302_000000_env.json",
            ]
        );
    }

    #[test]
    fn oversized_max_age_skips_age_phase() {
        let now = parse_stamp("20240301_000000");
        assert!(age_cutoff(now, u32::MAX).is_none());
        assert!(age_cutoff(None, 30).is_none());
        assert_eq!(age_cutoff(now, 1), parse_stamp("20240229_000000"));
    }

    #[test]
    fn missing_directory_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("absent")).is_empty());
    }
}
