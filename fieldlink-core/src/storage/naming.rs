//! Queue file naming
//!
//! Every queue file is named `<stamp>_<kind>.<ext>`:
//!
//! ```text
//! 20240301_120000_env.json       ambient reading
//! 20240301_120000_thermal.json   thermal half of a capture
//! 20240301_120000_visual.jpg     visual half of the same capture
//! 20240301_120000-1_env.json     second reading within the same second
//! unsynced-000000073421_env.json wall clock not set yet
//! ```
//!
//! The stamp is the only age information eviction trusts; filesystem
//! timestamps are ignored because the device clock may have been wrong when
//! the file was written.
//!
//! Plain name order is not capture order: `-` sorts before `_`, so a `-1`
//! discriminator would come ahead of its base name. Anything that needs
//! capture order sorts by [`NameOrder`] instead.

use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::constants::{STAMP_FORMAT, STAMP_LEN, UNSYNCED_PREFIX, UNSYNCED_UPTIME_WIDTH};
use crate::time::Timestamp;

/// Type of a queue file, encoded in its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Ambient reading JSON
    Env,
    /// Thermal frame JSON
    Thermal,
    /// Visual JPEG
    Visual,
}

impl EntryKind {
    /// Filename suffix including the separator
    pub fn suffix(self) -> &'static str {
        match self {
            EntryKind::Env => "_env.json",
            EntryKind::Thermal => "_thermal.json",
            EntryKind::Visual => "_visual.jpg",
        }
    }

    /// Split a filename into base name and kind
    pub fn split(file_name: &str) -> Option<(&str, EntryKind)> {
        [EntryKind::Env, EntryKind::Thermal, EntryKind::Visual]
            .into_iter()
            .find_map(|kind| {
                file_name
                    .strip_suffix(kind.suffix())
                    .filter(|base| !base.is_empty())
                    .map(|base| (base, kind))
            })
    }

    /// Full filename for a base name
    pub fn file_name(self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }
}

/// When a reading was captured, as far as the device knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStamp {
    /// Wall clock was synced
    At(NaiveDateTime),
    /// Wall clock unsynced; uptime is the only ordering available
    Unsynced {
        /// Milliseconds since boot
        uptime_ms: Timestamp,
    },
}

impl CaptureStamp {
    pub fn new(wall: Option<NaiveDateTime>, uptime_ms: Timestamp) -> Self {
        match wall {
            Some(at) => CaptureStamp::At(at),
            None => CaptureStamp::Unsynced { uptime_ms },
        }
    }
}

impl fmt::Display for CaptureStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStamp::At(at) => write!(f, "{}", at.format(STAMP_FORMAT)),
            CaptureStamp::Unsynced { uptime_ms } => write!(
                f,
                "{}{:0width$}",
                UNSYNCED_PREFIX,
                uptime_ms,
                width = UNSYNCED_UPTIME_WIDTH
            ),
        }
    }
}

/// Parse the fixed-width date prefix of a filename
///
/// Returns `None` for anything that does not start with `YYYYMMDD_HHMMSS`;
/// such files have no known age.
pub fn parse_stamp(file_name: &str) -> Option<NaiveDateTime> {
    let prefix = file_name.get(..STAMP_LEN)?;
    NaiveDateTime::parse_from_str(prefix, STAMP_FORMAT).ok()
}

/// Capture-order key of a queue file name
///
/// Dated names come first (by stamp, then discriminator), then unsynced
/// names (by uptime, then discriminator), then anything else by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameOrder {
    /// `YYYYMMDD_HHMMSS[-N]...`
    Dated { at: NaiveDateTime, seq: u32 },
    /// `unsynced-<uptime>[-N]...`
    Unsynced { uptime_ms: Timestamp, seq: u32 },
    /// Not a stamped name
    Other(String),
}

impl NameOrder {
    pub fn of(file_name: &str) -> Self {
        if let Some(at) = parse_stamp(file_name) {
            return NameOrder::Dated {
                at,
                seq: discriminator(&file_name[STAMP_LEN..]),
            };
        }
        if let Some(rest) = file_name.strip_prefix(UNSYNCED_PREFIX) {
            let digits = leading_digits(rest);
            if let Ok(uptime_ms) = rest[..digits].parse() {
                return NameOrder::Unsynced {
                    uptime_ms,
                    seq: discriminator(&rest[digits..]),
                };
            }
        }
        NameOrder::Other(file_name.to_owned())
    }

    pub fn of_path(path: &Path) -> Self {
        Self::of(&path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default())
    }
}

fn leading_digits(s: &str) -> usize {
    s.bytes().take_while(u8::is_ascii_digit).count()
}

/// `-N` right after the stamp; 0 when absent
fn discriminator(rest: &str) -> u32 {
    rest.strip_prefix('-')
        .and_then(|r| r[..leading_digits(r)].parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn stamp_formats() {
        assert_eq!(CaptureStamp::At(at(12, 5, 9)).to_string(), "20240301_120509");
        assert_eq!(
            CaptureStamp::new(None, 73421).to_string(),
            "unsynced-000000073421"
        );
    }

    #[test]
    fn name_order_is_capture_order() {
        let mut names = vec![
            "unsynced-10000_env.json",
            "20240301_120000-10_env.json",
            "20240301_120000-1_env.json",
            "notes.txt",
            "unsynced-9999-1_env.json",
            "20240301_120000_env.json",
            "20240301_120000-2_env.json",
            "unsynced-9999_env.json",
            "20240301_115959_env.json",
        ];
        names.sort_by_key(|n| NameOrder::of(n));
        assert_eq!(
            names,
            vec![
                "20240301_115959_env.json",
                "20240301_120000_env.json",
                "20240301_120000-1_env.json",
                "20240301_120000-2_env.json",
                "20240301_120000-10_env.json",
                "unsynced-9999_env.json",
                "unsynced-9999-1_env.json",
                "unsynced-10000_env.json",
                "notes.txt",
            ]
        );
    }

    #[test]
    fn padded_unsynced_stamps_parse_back() {
        let name = EntryKind::Env.file_name(&CaptureStamp::new(None, 4200).to_string());
        assert_eq!(
            NameOrder::of(&name),
            NameOrder::Unsynced {
                uptime_ms: 4200,
                seq: 0
            }
        );
    }

    #[test]
    fn parses_prefix_with_suffixes() {
        assert_eq!(parse_stamp("20240301_120509_env.json"), Some(at(12, 5, 9)));
        assert_eq!(parse_stamp("20240301_120509-2_visual.jpg"), Some(at(12, 5, 9)));
        assert_eq!(parse_stamp("20240301_120509.log"), Some(at(12, 5, 9)));
    }

    #[test]
    fn unparsable_names_have_no_age() {
        assert_eq!(parse_stamp("unsynced-73421_env.json"), None);
        assert_eq!(parse_stamp("device.log"), None);
        assert_eq!(parse_stamp("20241399_000000_env.json"), None);
        assert_eq!(parse_stamp(""), None);
    }

    #[test]
    fn splits_kind_and_base() {
        assert_eq!(
            EntryKind::split("20240301_120509_thermal.json"),
            Some(("20240301_120509", EntryKind::Thermal))
        );
        assert_eq!(
            EntryKind::split("20240301_120509-1_visual.jpg"),
            Some(("20240301_120509-1", EntryKind::Visual))
        );
        assert_eq!(EntryKind::split("_env.json"), None);
        assert_eq!(EntryKind::split("notes.txt"), None);
    }
}
