//! Age and space eviction over a small quota volume

mod common;

use std::fs;

use common::*;
use fieldlink_core::storage::{Area, EvictionPolicy, StorageManager};

const FILE_SIZE: usize = 100;

fn put(storage: &StorageManager, area: Area, name: &str) {
    fs::write(storage.dir(area).join(name), vec![b'x'; FILE_SIZE]).unwrap();
}

fn policy(max_age_days: u32, min_free_percent: u8) -> EvictionPolicy {
    EvictionPolicy {
        max_age_days,
        min_free_percent,
    }
}

#[test]
fn old_archive_files_are_aged_out_and_pending_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 1_000);

    for day in 1..=5 {
        put(&storage, Area::ArchiveAmbient, &format!("2024010{}_000000_env.json", day));
        put(&storage, Area::ArchiveCapture, &format!("2024032{}_000000_thermal.json", day));
    }
    fs::write(
        storage.dir(Area::PendingAmbient).join("20230101_000000_env.json"),
        b"{}",
    )
    .unwrap();

    let report = storage
        .manage(policy(30, 10), Some(at("20240331_000000")))
        .unwrap();

    assert!(report.triggered);
    assert_eq!(report.deleted_by_age, 5);
    assert_eq!(report.deleted_for_space, 0);
    assert_eq!(report.bytes_freed, 5 * FILE_SIZE as u64);
    assert!(report.floor_met);

    assert!(names(&storage.dir(Area::ArchiveAmbient)).is_empty());
    assert_eq!(names(&storage.dir(Area::ArchiveCapture)).len(), 5);
    assert_eq!(
        names(&storage.dir(Area::PendingAmbient)),
        vec!["20230101_000000_env.json"]
    );
}

#[test]
fn space_pressure_evicts_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 1_000);

    // Inserted out of order; all within the age limit
    for minute in [7, 2, 9, 0, 5, 1, 8, 3, 6, 4] {
        put(&storage, Area::ArchiveCapture, &format!("20240330_12{:02}00_thermal.json", minute));
    }

    let report = storage
        .manage(policy(30, 35), Some(at("20240331_000000")))
        .unwrap();

    assert_eq!(report.deleted_by_age, 0);
    assert_eq!(report.deleted_for_space, 4);
    assert!(report.floor_met);

    let remaining = names(&storage.dir(Area::ArchiveCapture));
    assert_eq!(
        remaining,
        (4..10)
            .map(|m| format!("20240330_12{:02}00_thermal.json", m))
            .collect::<Vec<_>>()
    );
}

#[test]
fn below_high_water_nothing_is_scanned() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 100_000);
    put(&storage, Area::ArchiveAmbient, "20000101_000000_env.json");

    let report = storage
        .manage(policy(1, 10), Some(at("20240331_000000")))
        .unwrap();

    assert!(!report.triggered);
    assert_eq!(report.deleted(), 0);
    assert_eq!(names(&storage.dir(Area::ArchiveAmbient)).len(), 1);
}

#[test]
fn unsynced_clock_skips_age_and_undated_files_survive() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 1_000);

    for i in 0..5 {
        put(&storage, Area::Logs, &format!("unsynced-{}_env.json", i));
    }
    for day in 1..=5 {
        put(&storage, Area::ArchiveAmbient, &format!("2020010{}_000000_env.json", day));
    }

    // Floor of 100% can never be met: everything dated goes, undated stays
    let report = storage.manage(policy(30, 100), None).unwrap();

    assert_eq!(report.deleted_by_age, 0);
    assert_eq!(report.deleted_for_space, 5);
    assert!(!report.floor_met);
    assert_eq!(names(&storage.dir(Area::Logs)).len(), 5);
    assert!(names(&storage.dir(Area::ArchiveAmbient)).is_empty());
}

#[test]
fn logs_are_evicted_before_archives() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 1_000);

    for minute in 0..5 {
        put(&storage, Area::Logs, &format!("20240330_12{:02}00_env.json", minute));
        put(&storage, Area::ArchiveAmbient, &format!("20240329_12{:02}00_env.json", minute));
    }

    let report = storage
        .manage(policy(30, 20), Some(at("20240331_000000")))
        .unwrap();

    assert_eq!(report.deleted_for_space, 2);
    assert_eq!(names(&storage.dir(Area::Logs)).len(), 3);
    assert_eq!(names(&storage.dir(Area::ArchiveAmbient)).len(), 5);
}

#[test]
fn same_second_archives_are_evicted_in_capture_order() {
    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_capacity(dir.path(), 1_000);

    put(&storage, Area::ArchiveCapture, "20240330_120000-1_thermal.json");
    put(&storage, Area::ArchiveCapture, "20240330_120000_thermal.json");
    put(&storage, Area::ArchiveCapture, "20240330_120000-2_thermal.json");
    for minute in 1..8 {
        put(&storage, Area::ArchiveCapture, &format!("20240330_12{:02}00_thermal.json", minute));
    }

    // Ten files of 100 bytes; a 20% floor needs two of them gone
    let report = storage
        .manage(policy(30, 20), Some(at("20240331_000000")))
        .unwrap();

    assert_eq!(report.deleted_for_space, 2);
    let remaining = names(&storage.dir(Area::ArchiveCapture));
    assert!(!remaining.contains(&"20240330_120000_thermal.json".to_owned()));
    assert!(!remaining.contains(&"20240330_120000-1_thermal.json".to_owned()));
    assert!(remaining.contains(&"20240330_120000-2_thermal.json".to_owned()));
    assert_eq!(remaining.len(), 8);
}
