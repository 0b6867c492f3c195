//! Durable Pending-Data Queue
//!
//! ## Overview
//!
//! Readings are written to flash before anything else happens to them when
//! the link is down, and stay there until the backend confirms them. The
//! pending directories *are* the queue: there is no in-memory index, so the
//! queue survives power loss without any recovery step.
//!
//! ```text
//!  enqueue ──▶ pending/ ──reconcile──▶ send ──ok──▶ archive/
//!                 ▲                      │
//!                 └──── transient ───────┘
//!                        unreadable ──▶ deleted
//! ```
//!
//! ## Entry Shapes
//!
//! - **Ambient**: one `<base>_env.json`.
//! - **Capture**: `<base>_thermal.json`, optionally with `<base>_visual.jpg`.
//!   A thermal file whose visual partner is missing is sent thermal-only.
//! - **Orphan visual**: a `<base>_visual.jpg` without thermal data. It can
//!   never be delivered (the thermal part is mandatory) and is deleted.
//!
//! ## Delivery Guarantees
//!
//! Each reconciliation pass lists the directories once and handles each
//! entry at most once. A capture pair is always handled as a unit: if either
//! file is unreadable both are deleted, so thermal and visual data can never
//! drift out of alignment.
//!
//! After a confirmed send the files move to the archive. If that move fails
//! the pending copy is deleted instead: losing an archived copy is preferred
//! over delivering the same reading twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::errors::{DeliveryError, StorageResult};
use crate::link::LinkState;
use crate::storage::{Area, CaptureStamp, EntryKind, StorageManager};

/// Destination for queued data
pub trait Uplink {
    /// Submit one ambient reading JSON document
    fn send_ambient(&mut self, body: &str) -> Result<(), DeliveryError>;

    /// Submit a thermal frame JSON document with an optional JPEG
    fn send_capture(&mut self, thermal: &str, image: Option<&[u8]>) -> Result<(), DeliveryError>;
}

/// One undelivered unit of work, identified by its file path(s)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// Single ambient reading
    Ambient {
        path: PathBuf,
    },
    /// Thermal frame, with its visual partner when one exists
    Capture {
        thermal: PathBuf,
        visual: Option<PathBuf>,
    },
    /// Visual frame without thermal data
    OrphanVisual {
        path: PathBuf,
    },
}

impl QueueEntry {
    /// Files making up this entry
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            QueueEntry::Ambient { path } | QueueEntry::OrphanVisual { path } => vec![path.as_path()],
            QueueEntry::Capture { thermal, visual } => {
                let mut paths = vec![thermal.as_path()];
                paths.extend(visual.as_deref());
                paths
            }
        }
    }

    fn area(&self) -> Area {
        match self {
            QueueEntry::Ambient { .. } => Area::PendingAmbient,
            _ => Area::PendingCapture,
        }
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pass did not run: link down or device not activated
    pub skipped: bool,
    /// Entries confirmed by the backend
    pub sent: usize,
    /// Confirmed entries moved to the archive (the rest were deleted)
    pub archived: usize,
    /// Entries deleted as unreadable or undeliverable
    pub dropped: usize,
    /// Entries whose send failed; still pending
    pub deferred: usize,
    /// Backend rejected the token; the pass stopped early
    pub auth_rejected: bool,
}

impl ReconcileReport {
    /// Fold in the outcome of a follow-up pass over the same queue
    ///
    /// Entries deferred by the first pass were seen again by `later`, so
    /// only the later deferral count survives.
    pub fn merge(&mut self, later: ReconcileReport) {
        self.skipped &= later.skipped;
        self.sent += later.sent;
        self.archived += later.archived;
        self.dropped += later.dropped;
        self.deferred = later.deferred;
        self.auth_rejected = later.auth_rejected;
    }
}

/// Entry counts per pending directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub ambient: usize,
    pub capture: usize,
}

/// Queue view over the pending and archive directories
#[derive(Clone)]
pub struct PendingQueue {
    storage: Arc<StorageManager>,
}

impl PendingQueue {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }

    /// Persist one ambient reading
    pub fn enqueue_ambient(&self, stamp: &CaptureStamp, payload: &str) -> StorageResult<QueueEntry> {
        let base = self.free_base(Area::PendingAmbient, stamp, &[EntryKind::Env]);
        let path = self.storage.write(
            Area::PendingAmbient,
            &EntryKind::Env.file_name(&base),
            payload.as_bytes(),
        )?;
        debug!("queue: enqueued {}", path.display());
        Ok(QueueEntry::Ambient { path })
    }

    /// Persist one capture; the visual file is written first so a failure
    /// never leaves a visual frame without its thermal partner
    pub fn enqueue_capture(
        &self,
        stamp: &CaptureStamp,
        thermal: &str,
        image: Option<&[u8]>,
    ) -> StorageResult<QueueEntry> {
        let base = self.free_base(
            Area::PendingCapture,
            stamp,
            &[EntryKind::Thermal, EntryKind::Visual],
        );

        let visual = match image {
            Some(bytes) => Some(self.storage.write(
                Area::PendingCapture,
                &EntryKind::Visual.file_name(&base),
                bytes,
            )?),
            None => None,
        };

        let thermal = match self.storage.write(
            Area::PendingCapture,
            &EntryKind::Thermal.file_name(&base),
            thermal.as_bytes(),
        ) {
            Ok(path) => path,
            Err(e) => {
                if let Some(visual) = &visual {
                    let _ = self.storage.remove(visual);
                }
                return Err(e);
            }
        };

        debug!("queue: enqueued capture {}", base);
        Ok(QueueEntry::Capture { thermal, visual })
    }

    /// First base name for `stamp` not used by any of `kinds` in `area`
    fn free_base(&self, area: Area, stamp: &CaptureStamp, kinds: &[EntryKind]) -> String {
        let stem = stamp.to_string();
        let taken = |base: &str| {
            kinds
                .iter()
                .any(|kind| self.storage.contains(area, &kind.file_name(base)))
        };

        if !taken(&stem) {
            return stem;
        }
        (1u32..)
            .map(|n| format!("{}-{}", stem, n))
            .find(|base| !taken(base))
            .unwrap_or_else(|| stem.clone())
    }

    /// Snapshot of everything pending: ambient entries first, then captures,
    /// each in capture order
    pub fn list_pending(&self) -> StorageResult<Vec<QueueEntry>> {
        let mut entries: Vec<QueueEntry> = self
            .storage
            .list(Area::PendingAmbient)?
            .into_iter()
            .filter(|path| kind_of(path) == Some(EntryKind::Env))
            .map(|path| QueueEntry::Ambient { path })
            .collect();

        let capture_files = self.storage.list(Area::PendingCapture)?;
        let has = |base: &str, kind: EntryKind| {
            capture_files
                .iter()
                .find(|p| file_name(p) == Some(kind.file_name(base).as_str()))
                .cloned()
        };

        for path in &capture_files {
            let Some((base, kind)) = file_name(path).and_then(EntryKind::split) else {
                continue;
            };
            match kind {
                EntryKind::Thermal => entries.push(QueueEntry::Capture {
                    thermal: path.clone(),
                    visual: has(base, EntryKind::Visual),
                }),
                EntryKind::Visual if has(base, EntryKind::Thermal).is_none() => {
                    entries.push(QueueEntry::OrphanVisual { path: path.clone() })
                }
                _ => {}
            }
        }

        Ok(entries)
    }

    /// Entry counts, for status indication
    pub fn counts(&self) -> StorageResult<PendingCounts> {
        let mut counts = PendingCounts::default();
        for entry in self.list_pending()? {
            match entry {
                QueueEntry::Ambient { .. } => counts.ambient += 1,
                QueueEntry::Capture { .. } => counts.capture += 1,
                QueueEntry::OrphanVisual { .. } => {}
            }
        }
        Ok(counts)
    }

    /// Move a delivered entry to the archive
    ///
    /// Returns `true` when every file was archived. A file that cannot be
    /// moved is deleted so it is never sent again.
    pub fn archive(&self, entry: &QueueEntry) -> bool {
        let Some(archive) = entry.area().archive() else {
            return false;
        };

        let mut archived = true;
        for path in entry.paths() {
            match self.storage.relocate(path, archive) {
                Ok(_) => {}
                // Visual half that vanished before the send
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("queue: archive of {} failed ({}), deleting", path.display(), e);
                    if let Err(e) = self.storage.remove(path) {
                        warn!("queue: cannot delete {}: {}", path.display(), e);
                    }
                    archived = false;
                }
            }
        }
        archived
    }

    /// Delete every file of an entry
    pub fn discard(&self, entry: &QueueEntry) {
        for path in entry.paths() {
            match self.storage.remove(path) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("queue: cannot delete {}: {}", path.display(), e),
            }
        }
    }

    /// Re-attempt delivery of everything pending
    ///
    /// Runs only when the link is `Connected` and the device is activated.
    /// A `401` stops the pass: the token is bad for every remaining entry,
    /// and the caller should refresh before the next pass.
    pub fn reconcile(
        &self,
        link: LinkState,
        activated: bool,
        uplink: &mut dyn Uplink,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if link != LinkState::Connected || !activated {
            debug!("queue: reconcile skipped (link={:?}, activated={})", link, activated);
            report.skipped = true;
            return report;
        }

        let entries = match self.list_pending() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("queue: cannot list pending entries: {}", e);
                report.skipped = true;
                return report;
            }
        };

        for entry in entries {
            let outcome = match &entry {
                QueueEntry::Ambient { path } => match self.load_ambient(path) {
                    Some(body) => uplink.send_ambient(&body),
                    None => {
                        self.drop_entry(&entry, &mut report);
                        continue;
                    }
                },
                QueueEntry::Capture { thermal, visual } => {
                    match self.load_capture(thermal, visual.as_deref()) {
                        Some((body, image)) => uplink.send_capture(&body, image.as_deref()),
                        None => {
                            self.drop_entry(&entry, &mut report);
                            continue;
                        }
                    }
                }
                QueueEntry::OrphanVisual { .. } => {
                    self.drop_entry(&entry, &mut report);
                    continue;
                }
            };

            match outcome {
                Ok(()) => {
                    report.sent += 1;
                    if self.archive(&entry) {
                        report.archived += 1;
                    }
                }
                Err(DeliveryError::Unauthorized) => {
                    warn!("queue: token rejected, stopping reconcile");
                    report.deferred += 1;
                    report.auth_rejected = true;
                    break;
                }
                Err(e) => {
                    debug!("queue: send deferred: {}", e);
                    report.deferred += 1;
                }
            }
        }

        if report.sent + report.dropped + report.deferred > 0 {
            info!(
                "queue: reconcile sent={} archived={} dropped={} deferred={}",
                report.sent, report.archived, report.dropped, report.deferred
            );
        }
        report
    }

    fn drop_entry(&self, entry: &QueueEntry, report: &mut ReconcileReport) {
        warn!("queue: dropping undeliverable entry {:?}", entry.paths());
        self.discard(entry);
        report.dropped += 1;
    }

    fn load_ambient(&self, path: &Path) -> Option<String> {
        let body = self
            .storage
            .read_to_string(path)
            .map_err(|e| warn!("queue: unreadable {}: {}", path.display(), e))
            .ok()?;
        is_json(&body, path).then_some(body)
    }

    /// Read both halves of a capture; `None` means the pair is unusable
    ///
    /// A visual file that vanished since listing downgrades the entry to
    /// thermal-only; any other read failure condemns the pair.
    fn load_capture(&self, thermal: &Path, visual: Option<&Path>) -> Option<(String, Option<Vec<u8>>)> {
        let body = self
            .storage
            .read_to_string(thermal)
            .map_err(|e| warn!("queue: unreadable {}: {}", thermal.display(), e))
            .ok()?;
        if !is_json(&body, thermal) {
            return None;
        }

        let image = match visual {
            None => None,
            Some(path) => match self.storage.read(path) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.is_not_found() => {
                    debug!("queue: {} vanished, sending thermal only", path.display());
                    None
                }
                Err(e) => {
                    warn!("queue: unreadable {}: {}", path.display(), e);
                    return None;
                }
            },
        };
        Some((body, image))
    }
}

fn is_json(body: &str, path: &Path) -> bool {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(_) => true,
        Err(e) => {
            warn!("queue: corrupt {}: {}", path.display(), e);
            false
        }
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

fn kind_of(path: &Path) -> Option<EntryKind> {
    file_name(path)
        .and_then(EntryKind::split)
        .map(|(_, kind)| kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{parse_stamp, QuotaVolume};

    fn queue(root: &Path) -> PendingQueue {
        let mut storage = StorageManager::new(root, Box::new(QuotaVolume::new(root, 1 << 20)));
        storage.init().unwrap();
        PendingQueue::new(Arc::new(storage))
    }

    fn stamp() -> CaptureStamp {
        CaptureStamp::At(parse_stamp("20240301_120000").unwrap())
    }

    #[test]
    fn same_second_entries_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());

        let a = q.enqueue_ambient(&stamp(), "{}").unwrap();
        let b = q.enqueue_ambient(&stamp(), "{}").unwrap();
        let c = q.enqueue_ambient(&stamp(), "{}").unwrap();

        let names: Vec<String> = [a, b, c]
            .iter()
            .map(|e| file_name(e.paths()[0]).unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "20240301_120000_env.json",
                "20240301_120000-1_env.json",
                "20240301_120000-2_env.json",
            ]
        );
    }

    #[test]
    fn listing_groups_captures() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());

        q.enqueue_capture(&stamp(), "{}", Some(b"jpg")).unwrap();
        q.enqueue_capture(&stamp(), "{}", None).unwrap();
        std::fs::write(
            q.storage.dir(Area::PendingCapture).join("20240301_110000_visual.jpg"),
            b"orphan",
        )
        .unwrap();

        let entries = q.list_pending().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], QueueEntry::OrphanVisual { .. }));
        assert!(matches!(&entries[1], QueueEntry::Capture { visual: None, .. }));
        assert!(matches!(&entries[2], QueueEntry::Capture { visual: Some(_), .. }));

        let counts = q.counts().unwrap();
        assert_eq!(counts, PendingCounts { ambient: 0, capture: 2 });
    }

    #[test]
    fn unsynced_stamp_names_are_undated() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());

        let entry = q
            .enqueue_ambient(&CaptureStamp::new(None, 4200), "{}")
            .unwrap();
        let name = file_name(entry.paths()[0]).unwrap();
        assert_eq!(name, "unsynced-000000004200_env.json");
        assert!(parse_stamp(name).is_none());
    }
}
