//! Offline-first delivery layer for FieldLink
//!
//! Keeps an unattended edge device delivering sensor data over an
//! unreliable wireless link:
//!
//! - [`link`]: station link state machine with fixed-interval reconnection
//! - [`session`]: activation, token refresh and encrypted session state
//! - [`queue`]: durable on-flash pending queue, archived on confirmed send
//! - [`storage`]: flash layout and age/space-based eviction
//! - [`device`]: the control loop tying them to the collaborator ports
//!
//! Key constraints:
//! - Single flash volume, no operator
//! - Everything survives power loss at any point
//! - Nothing is fatal except a missing storage layout or a link that never came up
//!
//! ```no_run
//! use fieldlink_core::{Device, DeviceConfig, DevicePorts};
//! # fn ports() -> DevicePorts { unimplemented!() }
//!
//! let config = DeviceConfig::from_json_file("/etc/fieldlink.json").unwrap();
//! let mut device = Device::bootstrap(config, ports()).unwrap();
//!
//! loop {
//!     match device.run_cycle() {
//!         Ok(_) => {}
//!         Err(_) => break, // halt, wait for reset
//!     }
//! }
//! ```

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod constants;
pub mod device;
pub mod errors;
pub mod link;
pub mod payload;
pub mod queue;
pub mod session;
pub mod storage;
pub mod time;
pub mod traits;

// Public API
pub use backend::{BackendUplink, Endpoints};
pub use config::DeviceConfig;
pub use device::{CycleReport, Device, DevicePorts, DeviceStatus};
pub use errors::{
    ConfigError, DeliveryError, DeviceError, LinkError, SessionError, StorageError,
    TransportError,
};
pub use link::{ConnectivityManager, LinkEvent, LinkEvents, LinkPolicy, LinkState};
pub use payload::{AmbientReading, CaptureBundle, ThermalFrame};
pub use queue::{PendingQueue, QueueEntry, ReconcileReport, Uplink};
pub use session::{CredentialSession, Session, SessionCipher, SessionStore};
pub use storage::{Area, EvictionPolicy, StorageManager};
pub use time::{MonotonicTime, SystemWallClock, TimeSource, WallClock};
pub use traits::{KeyStore, LinkDriver, Sensors, Transport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
