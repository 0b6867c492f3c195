//! Time sources for the control loop
//!
//! Two different notions of time flow through the device:
//! - **Monotonic uptime** drives link backoff and collection scheduling. It
//!   never jumps, even when NTP corrects the wall clock.
//! - **Wall clock** names queue files and ages them out. It may be unsynced
//!   right after boot, which callers must handle (`None`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, Utc};

/// Milliseconds since an arbitrary origin (boot for monotonic sources)
pub type Timestamp = u64;

/// Monotonic millisecond clock
pub trait TimeSource: Send {
    /// Current timestamp in milliseconds
    fn now(&self) -> Timestamp;

    /// Milliseconds elapsed since `earlier`, saturating at zero
    fn elapsed_since(&self, earlier: Timestamp) -> u64 {
        self.now().saturating_sub(earlier)
    }
}

impl<T: TimeSource + Sync + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Uptime clock backed by `Instant`
///
/// Starts at 0 when constructed, always increases
#[derive(Debug, Clone)]
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_millis() as Timestamp
    }
}

/// Manually driven clock for tests
///
/// Clones share the same counter, so a test can keep one handle and give
/// another to the component under test.
#[derive(Debug, Clone, Default)]
pub struct ManualTime {
    now_ms: Arc<AtomicU64>,
}

impl ManualTime {
    pub fn new(start_ms: Timestamp) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now_ms.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Timestamp {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Calendar time source
pub trait WallClock: Send {
    /// Current UTC time, or `None` while the clock has not been synced
    fn now(&self) -> Option<NaiveDateTime>;
}

/// System clock
///
/// Devices without a backup battery boot at the epoch; anything before
/// 2020-01-01 is reported as unsynced.
#[derive(Debug, Clone, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> Option<NaiveDateTime> {
        let now = Utc::now().naive_utc();
        let floor = NaiveDate::from_ymd_opt(2020, 1, 1)?.and_hms_opt(0, 0, 0)?;
        (now >= floor).then_some(now)
    }
}

/// Settable wall clock for tests; clones share state
#[derive(Debug, Clone, Default)]
pub struct FixedWallClock {
    now: Arc<Mutex<Option<NaiveDateTime>>>,
}

impl FixedWallClock {
    pub fn new(now: Option<NaiveDateTime>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: Option<NaiveDateTime>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(now) = guard.as_mut() {
            *now += by;
        }
    }
}

impl WallClock for FixedWallClock {
    fn now(&self) -> Option<NaiveDateTime> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}
