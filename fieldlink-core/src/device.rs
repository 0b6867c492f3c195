//! Device Control Loop
//!
//! ## Overview
//!
//! [`Device`] wires the resilience layer to the collaborator ports and runs
//! one cooperative cycle per call:
//!
//! ```text
//!  run_cycle
//!    ├─ link.poll()                      ─ Failed before first connect ⇒ halt
//!    ├─ activate / ensure_authenticated  ─ only while Connected
//!    ├─ collect (when the interval is due)
//!    │    ├─ ambient  ─┐
//!    │    └─ capture  ─┴─ send now ─401─▶ refresh, retry once ─fail─▶ enqueue
//!    ├─ queue.reconcile()                ─ 401 ⇒ refresh, one more pass
//!    └─ storage.manage()
//! ```
//!
//! Everything runs on the caller's thread. The only fatal conditions are a
//! storage layout that cannot be created and an initial link setup that
//! exhausts its attempts; both surface as [`DeviceError`].

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::backend::BackendUplink;
use crate::config::DeviceConfig;
use crate::errors::{DeliveryError, DeviceError};
use crate::link::{ConnectivityManager, LinkState};
use crate::payload::{CaptureBundle, ThermalFrame};
use crate::queue::{PendingQueue, ReconcileReport, Uplink};
use crate::session::{CredentialSession, SessionCipher, SessionStore};
use crate::storage::{CaptureStamp, EvictionReport, StorageManager, Volume};
use crate::time::{TimeSource, Timestamp, WallClock};
use crate::traits::{KeyStore, LinkDriver, Sensors, Transport};

/// Collaborators the device runs against
pub struct DevicePorts {
    pub transport: Box<dyn Transport>,
    pub link_driver: Box<dyn LinkDriver>,
    pub sensors: Box<dyn Sensors>,
    /// Only read during bootstrap
    pub key_store: Box<dyn KeyStore>,
    pub volume: Box<dyn Volume>,
    pub wall_clock: Box<dyn WallClock>,
    /// Monotonic uptime shared by the link backoff and the collection timer
    pub uptime: Arc<dyn TimeSource + Sync>,
}

/// Snapshot for a status-indication component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub link: LinkState,
    pub activated: bool,
    pub pending_ambient: usize,
    pub pending_capture: usize,
    pub storage_available: bool,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub link: LinkState,
    /// Session was confirmed with the backend this cycle
    pub authenticated: bool,
    /// Readings were taken this cycle
    pub collected: bool,
    /// Items delivered immediately
    pub sent: usize,
    /// Items written to the pending queue
    pub queued: usize,
    /// Items that could neither be sent nor queued
    pub lost: usize,
    pub reconcile: ReconcileReport,
    /// Present when storage management ran
    pub eviction: Option<EvictionReport>,
}

/// The device: resilience layer plus collaborators
pub struct Device {
    config: DeviceConfig,
    storage: Arc<StorageManager>,
    queue: PendingQueue,
    link: ConnectivityManager,
    session: CredentialSession,
    transport: Box<dyn Transport>,
    sensors: Box<dyn Sensors>,
    wall_clock: Box<dyn WallClock>,
    uptime: Arc<dyn TimeSource + Sync>,
    last_collection_ms: Option<Timestamp>,
    failed_since_ms: Option<Timestamp>,
}

impl Device {
    /// Prepare storage, the session key and state, and start connecting
    pub fn bootstrap(config: DeviceConfig, ports: DevicePorts) -> Result<Self, DeviceError> {
        config.validate()?;

        let mut storage = StorageManager::new(&config.storage.root, ports.volume)
            .with_high_water_percent(config.storage.high_water_percent);
        if let Err(e) = storage.init() {
            error!("device: storage layout unavailable, halting: {}", e);
            return Err(DeviceError::StorageLayout(e));
        }
        let storage = Arc::new(storage);

        let mut key_store = ports.key_store;
        let cipher = SessionCipher::bootstrap(key_store.as_mut());
        let session = CredentialSession::open(
            SessionStore::new(storage.clone(), cipher),
            config.endpoints(),
        );

        let mut link = ConnectivityManager::new(
            ports.link_driver,
            Box::new(ports.uptime.clone()),
            config.link_policy(),
        );
        link.configure(&config.wifi.ssid, &config.wifi.secret)?;
        link.request_connect()?;

        info!(
            "device: {} bootstrapped (activated={})",
            config.device.id,
            session.is_activated()
        );

        Ok(Self {
            queue: PendingQueue::new(storage.clone()),
            storage,
            link,
            session,
            transport: ports.transport,
            sensors: ports.sensors,
            wall_clock: ports.wall_clock,
            uptime: ports.uptime,
            last_collection_ms: None,
            failed_since_ms: None,
            config,
        })
    }

    /// Run one control-loop iteration
    pub fn run_cycle(&mut self) -> Result<CycleReport, DeviceError> {
        let state = self.poll_link()?;
        let mut report = CycleReport {
            link: state,
            ..Default::default()
        };

        if state == LinkState::Connected {
            report.authenticated = self.authenticate();
        }

        let now = self.uptime.now();
        if self.collection_due(now) {
            self.last_collection_ms = Some(now);
            report.collected = true;
            self.collect(report.authenticated, &mut report);
        }

        report.reconcile = self.reconcile();

        match self
            .storage
            .manage(self.config.eviction_policy(), self.wall_clock.now())
        {
            Ok(eviction) => {
                if eviction.triggered {
                    info!(
                        "device: evicted {} files ({} bytes)",
                        eviction.deleted(),
                        eviction.bytes_freed
                    );
                }
                report.eviction = Some(eviction);
            }
            Err(e) => warn!("device: storage management skipped: {}", e),
        }

        Ok(report)
    }

    fn poll_link(&mut self) -> Result<LinkState, DeviceError> {
        let state = self.link.poll();
        if state != LinkState::Failed {
            self.failed_since_ms = None;
            return Ok(state);
        }

        if !self.link.has_connected() {
            error!("device: initial link setup failed, halting");
            return Err(DeviceError::LinkSetupExhausted {
                attempts: self.link.attempts(),
            });
        }

        let now = self.uptime.now();
        let since = *self.failed_since_ms.get_or_insert(now);
        if now.saturating_sub(since) >= self.config.link.rearm_after_ms {
            info!("device: re-arming failed link");
            self.link.reset_retries();
            self.failed_since_ms = None;
        }
        Ok(state)
    }

    /// Activate if needed, then confirm the session
    fn authenticate(&mut self) -> bool {
        if !self.session.is_activated() {
            let device = &self.config.device;
            if device.activation_code.is_empty() {
                debug!("device: no activation code configured");
                return false;
            }
            if let Err(e) = self.session.activate(
                self.transport.as_mut(),
                device.id,
                &device.activation_code,
                device.mac_address.as_deref(),
            ) {
                warn!("device: activation failed: {}", e);
                return false;
            }
        }

        match self.session.ensure_authenticated(self.transport.as_mut()) {
            Ok(()) => true,
            Err(e) => {
                warn!("device: not authenticated: {}", e);
                false
            }
        }
    }

    fn collection_interval_ms(&self) -> u64 {
        let minutes = match self.session.collection_interval_minutes() {
            0 => self.config.collection.interval_minutes,
            minutes => minutes,
        };
        u64::from(minutes) * 60_000
    }

    fn collection_due(&self, now: Timestamp) -> bool {
        self.last_collection_ms
            .map_or(true, |last| now.saturating_sub(last) >= self.collection_interval_ms())
    }

    fn collect(&mut self, online: bool, report: &mut CycleReport) {
        let stamp = CaptureStamp::new(self.wall_clock.now(), self.uptime.now());

        let ambient = self.sensors.read_ambient();
        if ambient.is_empty() {
            warn!("device: every ambient sensor invalid");
        }
        match ambient.to_json() {
            Ok(body) => {
                let sent = online && self.send_now(|uplink| uplink.send_ambient(&body));
                if sent {
                    report.sent += 1;
                } else {
                    match self.queue.enqueue_ambient(&stamp, &body) {
                        Ok(_) => report.queued += 1,
                        Err(e) => {
                            warn!("device: ambient reading lost: {}", e);
                            report.lost += 1;
                        }
                    }
                }
            }
            Err(e) => warn!("device: cannot encode ambient reading: {}", e),
        }

        if !self.config.collection.capture {
            return;
        }
        let Some(bundle) = self.capture(stamp) else {
            return;
        };

        let sent = online
            && self.send_now(|uplink| {
                uplink.send_capture(&bundle.thermal_json, bundle.image.as_deref())
            });
        if sent {
            report.sent += 1;
            return;
        }
        match self
            .queue
            .enqueue_capture(&bundle.stamp, &bundle.thermal_json, bundle.image.as_deref())
        {
            Ok(_) => report.queued += 1,
            Err(e) => {
                warn!("device: capture lost: {}", e);
                report.lost += 1;
            }
        }
    }

    /// Take one thermal frame and, best-effort, a visual frame
    fn capture(&mut self, stamp: CaptureStamp) -> Option<CaptureBundle> {
        let readings = match self.sensors.read_thermal_frame() {
            Ok(readings) => readings,
            Err(e) => {
                warn!("device: capture aborted: {}", e);
                return None;
            }
        };
        let thermal_json = ThermalFrame::from_readings(&readings)
            .map_err(|e| warn!("device: capture aborted: {}", e))
            .ok()?
            .to_json()
            .map_err(|e| warn!("device: cannot encode thermal frame: {}", e))
            .ok()?;

        let image = match self.sensors.capture_visual() {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                warn!("device: visual capture failed, sending thermal only: {}", e);
                None
            }
        };

        Some(CaptureBundle {
            stamp,
            thermal_json,
            image,
        })
    }

    /// Immediate delivery with one refresh-and-retry on `401`
    fn send_now<F>(&mut self, mut send: F) -> bool
    where
        F: FnMut(&mut dyn Uplink) -> Result<(), DeliveryError>,
    {
        let mut result = self.with_uplink(&mut send);
        if result == Err(DeliveryError::Unauthorized) {
            match self.session.refresh(self.transport.as_mut()) {
                Ok(()) => result = self.with_uplink(&mut send),
                Err(e) => warn!("device: refresh after 401 failed: {}", e),
            }
        }

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("device: immediate send failed, queueing: {}", e);
                false
            }
        }
    }

    fn with_uplink<F>(&mut self, send: &mut F) -> Result<(), DeliveryError>
    where
        F: FnMut(&mut dyn Uplink) -> Result<(), DeliveryError>,
    {
        let mut uplink = BackendUplink::new(
            self.transport.as_mut(),
            self.session.endpoints(),
            self.session.access_token(),
        );
        send(&mut uplink)
    }

    /// Reconcile the queue, with one refresh and second pass on `401`
    fn reconcile(&mut self) -> ReconcileReport {
        let mut report = self.reconcile_pass();
        if report.auth_rejected {
            match self.session.refresh(self.transport.as_mut()) {
                Ok(()) => {
                    let second = self.reconcile_pass();
                    report.merge(second);
                }
                Err(e) => warn!("device: refresh after 401 failed: {}", e),
            }
        }
        report
    }

    fn reconcile_pass(&mut self) -> ReconcileReport {
        let state = self.link.state();
        let activated = self.session.is_activated();
        let mut uplink = BackendUplink::new(
            self.transport.as_mut(),
            self.session.endpoints(),
            self.session.access_token(),
        );
        self.queue.reconcile(state, activated, &mut uplink)
    }

    pub fn status(&self) -> DeviceStatus {
        let counts = self.queue.counts().unwrap_or_default();
        DeviceStatus {
            link: self.link.state(),
            activated: self.session.is_activated(),
            pending_ambient: counts.ambient,
            pending_capture: counts.capture,
            storage_available: self.storage.is_available(),
        }
    }

    /// Probe the backend through the live link
    pub fn check_live_connectivity(&mut self) -> bool {
        let probe = self.config.probe_url();
        self.link
            .check_live_connectivity(self.transport.as_mut(), &probe)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn link(&self) -> &ConnectivityManager {
        &self.link
    }

    pub fn session(&self) -> &CredentialSession {
        &self.session
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }
}
