//! Common test utilities for integration tests
//!
//! This module provides:
//! - A scripted backend (`MockTransport`) routing by URL path suffix
//! - A link driver the test drives by hand (`MockLink`)
//! - Sensors with switchable failures (`MockSensors`)
//! - Storage fixtures on temporary directories

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use fieldlink_core::errors::{LinkError, SensorError, TransportError};
use fieldlink_core::storage::{parse_stamp, QuotaVolume, StorageManager};
use fieldlink_core::traits::{Body, LinkDriver, Request, Response, Sensors, Transport};
use fieldlink_core::{AmbientReading, LinkEvent, LinkEvents};

pub const ACTIVATE: &str = "/api/device/activate";
pub const AUTH: &str = "/api/device/auth";
pub const REFRESH: &str = "/api/device/refresh";
pub const AMBIENT: &str = "/api/data/ambient";
pub const CAPTURE: &str = "/api/data/capture";

type Reply = Result<Response, TransportError>;

#[derive(Default)]
struct Route {
    once: VecDeque<Reply>,
    always: Option<Reply>,
}

#[derive(Default)]
struct Backend {
    routes: HashMap<String, Route>,
    requests: Vec<Request>,
}

/// Scripted backend; clones share routes and the request log
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Backend>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to `path` with `status`/`body` from now on
    pub fn always(&self, path: &str, status: u16, body: &str) -> &Self {
        let mut backend = self.inner.lock().unwrap();
        backend.routes.entry(path.to_owned()).or_default().always =
            Some(Ok(Response::new(status, body)));
        self
    }

    /// Answer the next request to `path` once, ahead of the standing reply
    pub fn once(&self, path: &str, status: u16, body: &str) -> &Self {
        let mut backend = self.inner.lock().unwrap();
        backend
            .routes
            .entry(path.to_owned())
            .or_default()
            .once
            .push_back(Ok(Response::new(status, body)));
        self
    }

    /// Fail every request to `path` at the transport level
    pub fn unreachable(&self, path: &str) -> &Self {
        let mut backend = self.inner.lock().unwrap();
        backend.routes.entry(path.to_owned()).or_default().always =
            Some(Err(TransportError::Connect("connection refused".into())));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Requests whose URL ends with `path`
    pub fn requests_to(&self, path: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.ends_with(path))
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().requests.clear();
    }

    fn answer(&self, url: &str) -> Reply {
        let mut backend = self.inner.lock().unwrap();
        let route = backend
            .routes
            .iter_mut()
            .find(|(path, _)| url.ends_with(path.as_str()))
            .map(|(_, route)| route);
        match route {
            Some(route) => match route.once.pop_front() {
                Some(reply) => reply,
                None => route
                    .always
                    .clone()
                    .unwrap_or_else(|| Err(TransportError::Connect("no reply scripted".into()))),
            },
            None => Err(TransportError::Connect(format!("unrouted {}", url))),
        }
    }
}

impl Transport for MockTransport {
    fn post(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.inner.lock().unwrap().requests.push(request.clone());
        self.answer(&request.url)
    }

    fn get(&mut self, url: &str) -> Result<Response, TransportError> {
        self.answer(url)
    }
}

/// JSON body of a recorded request
pub fn json_body(request: &Request) -> serde_json::Value {
    match &request.body {
        Body::Json(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected JSON body, got {:?}", other),
    }
}

/// Names of the multipart parts of a recorded request
pub fn part_names(request: &Request) -> Vec<String> {
    match &request.body {
        Body::Multipart(parts) => parts.iter().map(|p| p.name.clone()).collect(),
        other => panic!("expected multipart body, got {:?}", other),
    }
}

#[derive(Default)]
struct Radio {
    events: Option<LinkEvents>,
    associations: usize,
    auto_connect: bool,
}

/// Link driver driven by the test; clones share state
#[derive(Clone, Default)]
pub struct MockLink {
    radio: Arc<Mutex<Radio>>,
}

impl MockLink {
    /// Driver that acquires an address as soon as association starts
    pub fn auto_connecting() -> Self {
        let link = Self::default();
        link.radio.lock().unwrap().auto_connect = true;
        link
    }

    pub fn emit(&self, event: LinkEvent) {
        if let Some(events) = &self.radio.lock().unwrap().events {
            events.notify(event);
        }
    }

    pub fn come_up(&self) {
        self.emit(LinkEvent::LinkUp);
        self.emit(LinkEvent::AddressAcquired);
    }

    pub fn drop_link(&self) {
        self.emit(LinkEvent::LinkDown);
    }

    pub fn set_auto_connect(&self, on: bool) {
        self.radio.lock().unwrap().auto_connect = on;
    }

    pub fn associations(&self) -> usize {
        self.radio.lock().unwrap().associations
    }
}

impl LinkDriver for MockLink {
    fn register(&mut self, events: LinkEvents) {
        self.radio.lock().unwrap().events = Some(events);
    }

    fn associate(&mut self, _ssid: &str, _secret: &str) -> Result<(), LinkError> {
        let auto = {
            let mut radio = self.radio.lock().unwrap();
            radio.associations += 1;
            radio.auto_connect
        };
        if auto {
            self.come_up();
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.drop_link();
    }
}

struct SensorState {
    ambient: AmbientReading,
    thermal_ok: bool,
    visual_ok: bool,
}

/// Sensors with switchable failures; clones share state
#[derive(Clone)]
pub struct MockSensors {
    state: Arc<Mutex<SensorState>>,
}

impl MockSensors {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState {
                ambient: AmbientReading::from_raw(120.5, 22.1, 55.0),
                thermal_ok: true,
                visual_ok: true,
            })),
        }
    }

    pub fn fail_thermal(&self, fail: bool) {
        self.state.lock().unwrap().thermal_ok = !fail;
    }

    pub fn fail_visual(&self, fail: bool) {
        self.state.lock().unwrap().visual_ok = !fail;
    }
}

impl Sensors for MockSensors {
    fn read_ambient(&mut self) -> AmbientReading {
        self.state.lock().unwrap().ambient
    }

    fn read_thermal_frame(&mut self) -> Result<Vec<f32>, SensorError> {
        if self.state.lock().unwrap().thermal_ok {
            Ok(vec![24.0; fieldlink_core::constants::THERMAL_PIXELS])
        } else {
            Err(SensorError::Unavailable("thermal array"))
        }
    }

    fn capture_visual(&mut self) -> Result<Vec<u8>, SensorError> {
        if self.state.lock().unwrap().visual_ok {
            Ok(vec![0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10])
        } else {
            Err(SensorError::Allocation)
        }
    }
}

/// Initialized storage on `root` with a 1 MiB volume
pub fn storage(root: &Path) -> Arc<StorageManager> {
    storage_with_capacity(root, 1 << 20)
}

pub fn storage_with_capacity(root: &Path, capacity: u64) -> Arc<StorageManager> {
    let mut storage = StorageManager::new(root, Box::new(QuotaVolume::new(root, capacity)));
    storage.init().unwrap();
    Arc::new(storage)
}

/// Parse a `YYYYMMDD_HHMMSS` literal
pub fn at(stamp: &str) -> NaiveDateTime {
    parse_stamp(stamp).unwrap()
}

/// File names in a directory, sorted
pub fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}
