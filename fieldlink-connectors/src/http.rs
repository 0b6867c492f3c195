//! Blocking HTTP Transport
//!
//! ## Overview
//!
//! [`HttpTransport`] implements the core `Transport` port on top of a
//! `ureq` agent. The agent keeps connections alive between calls, so a
//! reconciliation pass over many queued entries reuses one socket when the
//! server allows it.
//!
//! ## Status Handling
//!
//! `ureq` reports 4xx/5xx answers as `Error::Status`. Those are folded back
//! into a `Response`: the session and queue logic decide what a status
//! means, not the transport.
//!
//! | `ureq` outcome                          | Result                          |
//! |-----------------------------------------|---------------------------------|
//! | `Ok(response)`                          | `Ok(Response)`                  |
//! | `Err(Status(code, response))`           | `Ok(Response)` with that code   |
//! | `Err(Transport)` DNS / connect          | `Err(TransportError::Connect)`  |
//! | `Err(Transport)` bad URL                | `Err(TransportError::InvalidRequest)` |
//! | `Err(Transport)` anything else          | `Err(TransportError::Io)`       |
//!
//! ## Multipart
//!
//! Capture uploads are `multipart/form-data`. [`encode_multipart`] builds
//! the body; the boundary is regenerated per request.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fieldlink_core::constants::DEFAULT_HTTP_TIMEOUT_SECS;
use fieldlink_core::errors::TransportError;
use fieldlink_core::traits::{Body, Part, Request, Response, Transport};
use fieldlink_core::DeviceConfig;
use log::{debug, warn};
use thiserror::Error;

use crate::{lock, ConnectionStats};

/// HTTP-specific errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// HTTP configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout (connect + read + write)
    pub timeout: Duration,
    /// Custom headers added to every request
    pub headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl HttpConfig {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            headers: HashMap::new(),
            user_agent: format!("FieldLink/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Configuration matching a device's backend section
    pub fn from_device(config: &DeviceConfig) -> Self {
        Self::new().timeout(config.http_timeout())
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set request timeout in seconds
    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn validate(&self) -> Result<(), HttpError> {
        if self.timeout.is_zero() {
            return Err(HttpError::Config("timeout must be non-zero".into()));
        }
        for name in self.headers.keys() {
            let token = !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
            if !token {
                return Err(HttpError::Config(format!("invalid header name {:?}", name)));
            }
            if name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("content-type") {
                return Err(HttpError::Config(format!("{} is set per request", name)));
            }
        }
        Ok(())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `Transport` backed by a blocking `ureq` agent
pub struct HttpTransport {
    config: HttpConfig,
    agent: ureq::Agent,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl HttpTransport {
    /// Create new HTTP transport
    pub fn new(config: HttpConfig) -> Result<Self, HttpError> {
        config.validate()?;

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        Ok(Self {
            config,
            agent,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Snapshot of the request counters
    pub fn stats(&self) -> ConnectionStats {
        lock(&self.stats).clone()
    }

    fn prepare(&self, mut request: ureq::Request) -> ureq::Request {
        for (name, value) in &self.config.headers {
            request = request.set(name, value);
        }
        request
    }

    fn finish(
        &self,
        url: &str,
        outcome: Result<ureq::Response, ureq::Error>,
        bytes_sent: usize,
    ) -> Result<Response, TransportError> {
        let result = match outcome {
            Ok(response) => {
                let status = response.status();
                response
                    .into_string()
                    .map(|body| Response::new(status, body))
                    .map_err(|e| TransportError::Io(e.to_string()))
            }
            Err(ureq::Error::Status(status, response)) => {
                // The status is what matters; an unreadable error body is dropped
                Ok(Response::new(status, response.into_string().unwrap_or_default()))
            }
            Err(ureq::Error::Transport(transport)) => Err(map_transport(&transport)),
        };

        let mut stats = lock(&self.stats);
        match &result {
            Ok(response) => {
                debug!("http: {} -> {}", url, response.status);
                stats.record_answer(bytes_sent);
            }
            Err(e) => {
                warn!("http: {} failed: {}", url, e);
                stats.record_failure(e);
            }
        }
        result
    }
}

impl Transport for HttpTransport {
    fn post(&mut self, request: &Request) -> Result<Response, TransportError> {
        let mut call = self.prepare(self.agent.post(&request.url));
        if let Some(authorization) = &request.authorization {
            call = call.set("Authorization", authorization);
        }

        let (outcome, bytes) = match &request.body {
            Body::Json(text) => {
                let call = call
                    .set("Content-Type", "application/json")
                    .set("Accept", "application/json");
                (call.send_string(text), text.len())
            }
            Body::Multipart(parts) => {
                let boundary = next_boundary();
                let body = encode_multipart(parts, &boundary);
                let call = call.set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={}", boundary),
                );
                (call.send_bytes(&body), body.len())
            }
        };

        self.finish(&request.url, outcome, bytes)
    }

    fn get(&mut self, url: &str) -> Result<Response, TransportError> {
        let outcome = self.prepare(self.agent.get(url)).call();
        self.finish(url, outcome, 0)
    }
}

fn map_transport(error: &ureq::Transport) -> TransportError {
    match error.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
            TransportError::Connect(error.to_string())
        }
        ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
            TransportError::InvalidRequest(error.to_string())
        }
        _ => TransportError::Io(error.to_string()),
    }
}

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh multipart boundary
fn next_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("----FieldLinkBoundary{:016x}{:04x}", nanos, count & 0xffff)
}

/// Encode parts as a `multipart/form-data` body
///
/// Parts keep their order. `boundary` must not occur inside any part's data.
pub fn encode_multipart(parts: &[Part], boundary: &str) -> Vec<u8> {
    let size: usize = parts.iter().map(|p| p.data.len() + 160).sum();
    let mut body = Vec::with_capacity(size + boundary.len() + 8);

    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        let disposition = match &part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name, filename
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}
