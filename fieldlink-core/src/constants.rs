//! Constants for FieldLink Core
//!
//! Defaults and fixed limits used across the delivery layer. Values that an
//! operator may tune are only defaults here; the live values come from
//! [`DeviceConfig`](crate::config::DeviceConfig).

// ===== LINK =====

/// Maximum SSID length in bytes (802.11).
pub const WIFI_SSID_MAX: usize = 32;

/// Maximum WPA passphrase length in bytes.
pub const WIFI_SECRET_MAX: usize = 64;

/// Fixed delay between reconnection attempts (milliseconds).
///
/// Backoff is deliberately linear: the radio either comes back within a few
/// attempts or the access point is gone and waiting longer buys nothing.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;

/// Time allowed for one association + address acquisition (milliseconds).
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 20_000;

/// Attempts before the link enters `Failed`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Time a `Failed` link stays parked before the device re-arms it (milliseconds).
pub const DEFAULT_REARM_AFTER_MS: u64 = 300_000;

/// Link events buffered between polls; older events are dropped first.
pub const LINK_EVENT_QUEUE_DEPTH: usize = 16;

// ===== BACKEND =====

/// Per-request timeout (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Authorization scheme expected by the backend.
pub const AUTH_SCHEME: &str = "Device";

// ===== SESSION =====

/// Key-store entry holding the session encryption key.
pub const SESSION_KEY_NAME: &str = "session_key";

/// Session state file inside the secure-state directory.
pub const SESSION_FILE_NAME: &str = "session.dat";

/// AES-256 key length (bytes).
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length (bytes).
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length (bytes).
pub const TAG_LEN: usize = 16;

/// Collection interval used until the backend sends one (minutes).
pub const DEFAULT_COLLECTION_INTERVAL_MINUTES: u32 = 10;

// ===== STORAGE =====

/// Files older than this are evicted from archive and log directories (days).
pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

/// Largest accepted `max_age_days` (100 years).
pub const MAX_AGE_DAYS_LIMIT: u32 = 36_500;

/// Free-space floor maintained by eviction (percent of capacity).
pub const DEFAULT_MIN_FREE_PERCENT: u8 = 10;

/// Usage above which `manage` scans at all (percent of capacity).
pub const DEFAULT_HIGH_WATER_PERCENT: u8 = 90;

/// Capacity assumed for the storage root when none is configured (bytes).
pub const DEFAULT_VOLUME_CAPACITY_BYTES: u64 = 8 * 1024 * 1024 * 1024;

/// chrono format of the filename timestamp prefix.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Width of the filename timestamp prefix (`YYYYMMDD_HHMMSS`).
pub const STAMP_LEN: usize = 15;

/// Prefix of stamps taken before the wall clock was synced.
pub const UNSYNCED_PREFIX: &str = "unsynced-";

/// Zero-padded width of the uptime in unsynced stamps (milliseconds).
pub const UNSYNCED_UPTIME_WIDTH: usize = 12;

// ===== CAPTURE =====

/// Thermal array resolution: 32 x 24.
pub const THERMAL_PIXELS: usize = 768;
