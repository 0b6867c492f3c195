//! Station Link State Machine
//!
//! ## Overview
//!
//! Keeps the wireless station link up without an external watchdog. The
//! manager is polled from the control loop; the radio reports progress
//! asynchronously through a [`LinkEvents`] handle that `poll` drains.
//!
//! ```text
//!                 request_connect / retry due
//!  Disconnected ─────────────────────────────▶ Connecting
//!       ▲                                       │    │
//!       │ disconnect        address acquired    │    │ attempt timeout
//!       │                                       ▼    ▼
//!       └──────────────────────────────── Connected  Lost ──(retry due)──▶ Connecting
//!                                           │        ▲
//!                                           └────────┘ link down
//!
//!  Connecting ──timeout, attempts exhausted──▶ Failed ──reset_retries──▶ (retried)
//! ```
//!
//! ## Event Handling
//!
//! Events only move the machine along edges that are unambiguous:
//! address acquisition always means `Connected`, and link loss while
//! `Connected` always means `Lost`. A link-down while still `Connecting` is
//! ignored; the attempt timeout in [`poll`](ConnectivityManager::poll)
//! resolves it, so an event racing with the poll loop can never leave two
//! writers disagreeing about the state.
//!
//! ## Backoff
//!
//! Attempts are spaced by a fixed interval and capped. Once the cap is hit
//! the link parks in `Failed` until [`reset_retries`] re-arms it.
//!
//! [`reset_retries`]: ConnectivityManager::reset_retries

use std::fmt;
use std::sync::{Arc, Mutex};

use heapless::Deque;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL_MS,
    LINK_EVENT_QUEUE_DEPTH, WIFI_SECRET_MAX, WIFI_SSID_MAX,
};
use crate::errors::{LinkError, LinkResult};
use crate::time::{TimeSource, Timestamp};
use crate::traits::{LinkDriver, Transport};

/// Station link state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped or an attempt timed out; retries remain
    Lost,
    /// Attempt cap reached
    Failed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Lost => "lost",
            LinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Asynchronous notification from the link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Associated with the access point; no address yet
    LinkUp,
    /// Network address acquired; the link is usable
    AddressAcquired,
    /// Association lost
    LinkDown,
}

/// Cloneable handle the driver uses to report link events
///
/// Events are buffered in a fixed-depth queue. When it is full the oldest
/// event is dropped; only the most recent transitions matter to the machine.
#[derive(Clone)]
pub struct LinkEvents {
    queue: Arc<Mutex<Deque<LinkEvent, LINK_EVENT_QUEUE_DEPTH>>>,
}

impl LinkEvents {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(Deque::new())),
        }
    }

    /// Report an event; safe to call from any thread
    pub fn notify(&self, event: LinkEvent) {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if queue.is_full() {
            queue.pop_front();
        }
        let _ = queue.push_back(event);
    }

    /// Take every buffered event, oldest first
    pub fn drain(&self) -> Vec<LinkEvent> {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        let mut events = Vec::with_capacity(queue.len());
        while let Some(event) = queue.pop_front() {
            events.push(event);
        }
        events
    }

    /// Number of events waiting for the next poll
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for LinkEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnection timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Minimum time between the last link event and the next attempt
    pub retry_interval_ms: u64,
    /// Time allowed for one attempt to reach `Connected`
    pub attempt_timeout_ms: u64,
    /// Attempts before entering `Failed`
    pub max_attempts: u32,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Owner of the station link lifecycle
pub struct ConnectivityManager {
    driver: Box<dyn LinkDriver>,
    clock: Box<dyn TimeSource>,
    events: LinkEvents,
    policy: LinkPolicy,
    ssid: heapless::String<WIFI_SSID_MAX>,
    secret: heapless::String<WIFI_SECRET_MAX>,
    configured: bool,
    state: LinkState,
    attempts: u32,
    attempt_started_ms: Timestamp,
    last_event_ms: Option<Timestamp>,
    ever_connected: bool,
}

impl ConnectivityManager {
    /// Create a manager and hand the driver its event handle
    pub fn new(mut driver: Box<dyn LinkDriver>, clock: Box<dyn TimeSource>, policy: LinkPolicy) -> Self {
        let events = LinkEvents::new();
        driver.register(events.clone());
        Self {
            driver,
            clock,
            events,
            policy,
            ssid: heapless::String::new(),
            secret: heapless::String::new(),
            configured: false,
            state: LinkState::Disconnected,
            attempts: 0,
            attempt_started_ms: 0,
            last_event_ms: None,
            ever_connected: false,
        }
    }

    /// Store station credentials; no I/O
    pub fn configure(&mut self, ssid: &str, secret: &str) -> LinkResult<()> {
        if ssid.is_empty() {
            return Err(LinkError::NotConfigured);
        }

        let mut new_ssid = heapless::String::new();
        new_ssid.push_str(ssid).map_err(|_| LinkError::CredentialTooLong {
            field: "ssid",
            max: WIFI_SSID_MAX,
        })?;
        let mut new_secret = heapless::String::new();
        new_secret.push_str(secret).map_err(|_| LinkError::CredentialTooLong {
            field: "secret",
            max: WIFI_SECRET_MAX,
        })?;

        self.ssid = new_ssid;
        self.secret = new_secret;
        self.configured = true;
        debug!("link: configured for '{}'", self.ssid);
        Ok(())
    }

    /// Start connecting unless already connected or connecting
    ///
    /// Resets the attempt counter. Association completes asynchronously.
    pub fn request_connect(&mut self) -> LinkResult<()> {
        if !self.configured {
            return Err(LinkError::NotConfigured);
        }
        if matches!(self.state, LinkState::Connected | LinkState::Connecting) {
            return Ok(());
        }
        self.attempts = 0;
        self.start_attempt();
        Ok(())
    }

    /// Advance the machine: apply pending events, then run timers
    ///
    /// Must be called frequently from the control loop.
    pub fn poll(&mut self) -> LinkState {
        for event in self.events.drain() {
            self.apply(event);
        }

        let now = self.clock.now();
        match self.state {
            LinkState::Connecting => {
                if now.saturating_sub(self.attempt_started_ms) >= self.policy.attempt_timeout_ms {
                    warn!("link: attempt {} timed out", self.attempts);
                    self.last_event_ms = Some(now);
                    self.end_attempt();
                }
            }
            LinkState::Disconnected | LinkState::Lost | LinkState::Failed => {
                if self.configured && self.attempts < self.policy.max_attempts && self.retry_due(now) {
                    self.start_attempt();
                }
            }
            LinkState::Connected => {}
        }
        self.state
    }

    fn retry_due(&self, now: Timestamp) -> bool {
        self.last_event_ms
            .map_or(true, |at| now.saturating_sub(at) >= self.policy.retry_interval_ms)
    }

    fn start_attempt(&mut self) {
        let now = self.clock.now();
        self.attempts += 1;
        self.attempt_started_ms = now;
        self.transition(LinkState::Connecting);
        info!(
            "link: connecting to '{}' (attempt {}/{})",
            self.ssid, self.attempts, self.policy.max_attempts
        );

        if let Err(e) = self.driver.associate(&self.ssid, &self.secret) {
            warn!("link: {}", e);
            self.last_event_ms = Some(now);
            self.end_attempt();
        }
    }

    fn end_attempt(&mut self) {
        if self.attempts >= self.policy.max_attempts {
            self.transition(LinkState::Failed);
        } else {
            self.transition(LinkState::Lost);
        }
    }

    fn apply(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::LinkUp => debug!("link: associated, waiting for address"),
            LinkEvent::AddressAcquired => {
                self.attempts = 0;
                self.ever_connected = true;
                self.transition(LinkState::Connected);
            }
            LinkEvent::LinkDown => match self.state {
                LinkState::Connected => {
                    self.last_event_ms = Some(self.clock.now());
                    self.transition(LinkState::Lost);
                }
                state => debug!("link: link down ignored while {}", state),
            },
        }
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            info!("link: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Tear the link down; `poll` reconnects after the retry interval
    pub fn disconnect(&mut self) {
        self.driver.disconnect();
        self.last_event_ms = Some(self.clock.now());
        self.transition(LinkState::Disconnected);
    }

    /// Re-arm a `Failed` link
    pub fn reset_retries(&mut self) {
        self.attempts = 0;
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// True once any attempt has reached `Connected`
    pub fn has_connected(&self) -> bool {
        self.ever_connected
    }

    /// Attempts made since the counter was last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    /// Another handle to the event queue, e.g. for a second event source
    pub fn event_sender(&self) -> LinkEvents {
        self.events.clone()
    }

    /// Best-effort reachability probe
    ///
    /// Returns `true` only when connected and the probe answers `200`/`204`.
    pub fn check_live_connectivity(&self, transport: &mut dyn Transport, probe_url: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        match transport.get(probe_url) {
            Ok(response) => {
                debug!("link: probe {} -> {}", probe_url, response.status);
                response.is_success()
            }
            Err(e) => {
                debug!("link: probe {} failed: {}", probe_url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::time::ManualTime;
    use crate::traits::{Request, Response};

    #[derive(Default)]
    struct Radio {
        events: Option<LinkEvents>,
        associations: Arc<Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl LinkDriver for Radio {
        fn register(&mut self, events: LinkEvents) {
            self.events = Some(events);
        }

        fn associate(&mut self, ssid: &str, _secret: &str) -> Result<(), LinkError> {
            self.associations.lock().unwrap().push(ssid.to_owned());
            if self.refuse {
                Err(LinkError::Association("radio off".into()))
            } else {
                Ok(())
            }
        }

        fn disconnect(&mut self) {}
    }

    fn policy() -> LinkPolicy {
        LinkPolicy {
            retry_interval_ms: 1_000,
            attempt_timeout_ms: 5_000,
            max_attempts: 3,
        }
    }

    fn manager(radio: Radio, time: &ManualTime) -> ConnectivityManager {
        let mut link = ConnectivityManager::new(Box::new(radio), Box::new(time.clone()), policy());
        link.configure("field-ap", "secret").unwrap();
        link
    }

    #[test]
    fn address_acquired_connects_and_resets_attempts() {
        let time = ManualTime::new(0);
        let mut link = manager(Radio::default(), &time);

        link.request_connect().unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.attempts(), 1);

        link.event_sender().notify(LinkEvent::LinkUp);
        assert_eq!(link.poll(), LinkState::Connecting);

        link.event_sender().notify(LinkEvent::AddressAcquired);
        assert_eq!(link.poll(), LinkState::Connected);
        assert_eq!(link.attempts(), 0);
        assert!(link.has_connected());

        // already connected: no new attempt
        link.request_connect().unwrap();
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[test]
    fn timeouts_back_off_then_fail() {
        let time = ManualTime::new(0);
        let radio = Radio::default();
        let associations = radio.associations.clone();
        let mut link = manager(radio, &time);

        link.request_connect().unwrap();
        time.advance(5_000);
        assert_eq!(link.poll(), LinkState::Lost);

        // retry interval not yet elapsed
        time.advance(500);
        assert_eq!(link.poll(), LinkState::Lost);

        time.advance(500);
        assert_eq!(link.poll(), LinkState::Connecting);
        assert_eq!(link.attempts(), 2);

        time.advance(5_000);
        assert_eq!(link.poll(), LinkState::Lost);
        time.advance(1_000);
        assert_eq!(link.poll(), LinkState::Connecting);
        time.advance(5_000);
        assert_eq!(link.poll(), LinkState::Failed);

        time.advance(60_000);
        assert_eq!(link.poll(), LinkState::Failed);
        assert_eq!(associations.lock().unwrap().len(), 3);
        assert!(!link.has_connected());

        link.reset_retries();
        assert_eq!(link.poll(), LinkState::Connecting);
        assert_eq!(associations.lock().unwrap().len(), 4);
    }

    #[test]
    fn link_down_only_drops_a_connected_link() {
        let time = ManualTime::new(0);
        let mut link = manager(Radio::default(), &time);
        let events = link.event_sender();

        link.request_connect().unwrap();
        events.notify(LinkEvent::LinkDown);
        assert_eq!(link.poll(), LinkState::Connecting);

        events.notify(LinkEvent::AddressAcquired);
        assert_eq!(link.poll(), LinkState::Connected);

        time.advance(100);
        events.notify(LinkEvent::LinkDown);
        assert_eq!(link.poll(), LinkState::Lost);

        time.advance(1_000);
        assert_eq!(link.poll(), LinkState::Connecting);
    }

    #[test]
    fn refused_association_counts_as_a_failed_attempt() {
        let time = ManualTime::new(0);
        let radio = Radio {
            refuse: true,
            ..Default::default()
        };
        let mut link = manager(radio, &time);

        link.request_connect().unwrap();
        assert_eq!(link.state(), LinkState::Lost);
        assert_eq!(link.attempts(), 1);
    }

    #[test]
    fn credentials_are_bounded() {
        let time = ManualTime::new(0);
        let mut link = ConnectivityManager::new(Box::new(Radio::default()), Box::new(time), policy());

        assert_eq!(link.request_connect(), Err(LinkError::NotConfigured));
        assert_eq!(
            link.configure(&"x".repeat(33), ""),
            Err(LinkError::CredentialTooLong {
                field: "ssid",
                max: WIFI_SSID_MAX
            })
        );
        assert_eq!(
            link.configure("ap", &"x".repeat(65)),
            Err(LinkError::CredentialTooLong {
                field: "secret",
                max: WIFI_SECRET_MAX
            })
        );
        assert!(link.configure(&"x".repeat(32), &"y".repeat(64)).is_ok());
    }

    #[test]
    fn event_queue_drops_oldest_when_full() {
        let events = LinkEvents::new();
        events.notify(LinkEvent::LinkDown);
        for _ in 0..LINK_EVENT_QUEUE_DEPTH {
            events.notify(LinkEvent::LinkUp);
        }
        assert_eq!(events.pending(), LINK_EVENT_QUEUE_DEPTH);

        let drained = events.drain();
        assert!(drained.iter().all(|e| *e == LinkEvent::LinkUp));
        assert_eq!(events.pending(), 0);
    }

    struct Probe(Result<u16, TransportError>);

    impl Transport for Probe {
        fn post(&mut self, _request: &Request) -> Result<Response, TransportError> {
            Err(TransportError::InvalidRequest("unused".into()))
        }

        fn get(&mut self, _url: &str) -> Result<Response, TransportError> {
            self.0.clone().map(|status| Response::new(status, ""))
        }
    }

    #[test]
    fn live_check_requires_connection_and_success() {
        let time = ManualTime::new(0);
        let mut link = manager(Radio::default(), &time);

        assert!(!link.check_live_connectivity(&mut Probe(Ok(200)), "http://probe"));

        link.request_connect().unwrap();
        link.event_sender().notify(LinkEvent::AddressAcquired);
        link.poll();

        assert!(link.check_live_connectivity(&mut Probe(Ok(204)), "http://probe"));
        assert!(!link.check_live_connectivity(&mut Probe(Ok(302)), "http://probe"));
        assert!(!link.check_live_connectivity(
            &mut Probe(Err(TransportError::Connect("dns".into()))),
            "http://probe"
        ));
    }
}
