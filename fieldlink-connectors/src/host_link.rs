//! Link driver for hosts whose OS manages the network
//!
//! On a Linux gateway the network is brought up by the OS, not by this
//! process. [`HostLink`] maps that onto the station-link event model:
//! "associating" means checking that a gateway address accepts a TCP
//! connection, and the events the radio would report are emitted once
//! it does.
//!
//! With no gateway configured the link is assumed up as soon as
//! association is requested.
//!
//! The SSID and secret are accepted and ignored.

use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fieldlink_core::errors::LinkError;
use fieldlink_core::traits::LinkDriver;
use fieldlink_core::{LinkEvent, LinkEvents};
use log::{debug, info, warn};

use crate::{lock, ConnectionStats};

/// Default reachability probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// `LinkDriver` that probes a gateway over TCP
pub struct HostLink {
    gateway: Option<SocketAddr>,
    timeout: Duration,
    events: Option<LinkEvents>,
    up: bool,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl HostLink {
    /// Probe `gateway` (e.g. the backend's host and port) on association
    pub fn new(gateway: SocketAddr) -> Self {
        Self {
            gateway: Some(gateway),
            ..Self::assume_up()
        }
    }

    /// No probing; the link comes up on the first association request
    pub fn assume_up() -> Self {
        Self {
            gateway: None,
            timeout: DEFAULT_PROBE_TIMEOUT,
            events: None,
            up: false,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn stats(&self) -> ConnectionStats {
        lock(&self.stats).clone()
    }

    /// Re-probe an established link; reports `LinkDown` if the gateway is gone
    ///
    /// Call from the host loop before polling the connectivity manager.
    /// Returns whether the link is still up.
    pub fn watch(&mut self) -> bool {
        if !self.up {
            return false;
        }
        if let Err(e) = self.probe() {
            warn!("host link: gateway lost: {}", e);
            self.up = false;
            self.emit(LinkEvent::LinkDown);
        }
        self.up
    }

    fn probe(&self) -> Result<(), String> {
        match self.gateway {
            Some(addr) => TcpStream::connect_timeout(&addr, self.timeout)
                .map(drop)
                .map_err(|e| format!("{}: {}", addr, e)),
            None => Ok(()),
        }
    }

    fn emit(&self, event: LinkEvent) {
        match &self.events {
            Some(events) => events.notify(event),
            None => debug!("host link: {:?} with no listener registered", event),
        }
    }
}

impl LinkDriver for HostLink {
    fn register(&mut self, events: LinkEvents) {
        self.events = Some(events);
    }

    /// Blocks for at most the probe timeout, then reports completion
    /// through the registered events
    fn associate(&mut self, ssid: &str, _secret: &str) -> Result<(), LinkError> {
        debug!("host link: associate requested for {:?}", ssid);
        if let Err(e) = self.probe() {
            lock(&self.stats).record_failure(&e);
            return Err(LinkError::Association(e));
        }

        let mut stats = lock(&self.stats);
        if stats.requests_answered > 0 {
            stats.reconnections += 1;
        }
        stats.requests_answered += 1;
        drop(stats);

        info!("host link: up");
        self.up = true;
        self.emit(LinkEvent::LinkUp);
        self.emit(LinkEvent::AddressAcquired);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.up {
            self.up = false;
            self.emit(LinkEvent::LinkDown);
        }
    }
}
