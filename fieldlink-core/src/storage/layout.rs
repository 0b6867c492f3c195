//! On-flash directory taxonomy

use std::fmt;

/// One managed directory under the storage root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Rotated device logs
    Logs,
    /// Session state
    SecureState,
    /// Undelivered ambient readings
    PendingAmbient,
    /// Undelivered thermal/visual captures
    PendingCapture,
    /// Delivered ambient readings
    ArchiveAmbient,
    /// Delivered captures
    ArchiveCapture,
}

impl Area {
    /// Every directory created at startup
    pub const ALL: [Area; 6] = [
        Area::Logs,
        Area::SecureState,
        Area::PendingAmbient,
        Area::PendingCapture,
        Area::ArchiveAmbient,
        Area::ArchiveCapture,
    ];

    /// Directories eviction may delete from; pending data is never evicted
    pub const EVICTABLE: [Area; 3] = [Area::Logs, Area::ArchiveAmbient, Area::ArchiveCapture];

    /// Path relative to the storage root
    pub fn relative_path(self) -> &'static str {
        match self {
            Area::Logs => "logs",
            Area::SecureState => "secure",
            Area::PendingAmbient => "pending/ambient",
            Area::PendingCapture => "pending/capture",
            Area::ArchiveAmbient => "archive/ambient",
            Area::ArchiveCapture => "archive/capture",
        }
    }

    /// Archive counterpart of a pending directory
    pub fn archive(self) -> Option<Area> {
        match self {
            Area::PendingAmbient => Some(Area::ArchiveAmbient),
            Area::PendingCapture => Some(Area::ArchiveCapture),
            _ => None,
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relative_path())
    }
}
