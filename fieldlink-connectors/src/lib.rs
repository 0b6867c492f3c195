//! Concrete Adapters for the FieldLink Ports
//!
//! ## Overview
//!
//! `fieldlink-core` never opens a socket itself. Every outbound request goes
//! through its `Transport` port and every link transition arrives through a
//! `LinkDriver`. This crate provides the adapters used on Linux gateways and
//! during bench testing:
//!
//! | Adapter                        | Port        | Backing                     |
//! |--------------------------------|-------------|-----------------------------|
//! | [`http::HttpTransport`]        | `Transport` | blocking `ureq` agent       |
//! | [`host_link::HostLink`]        | `LinkDriver`| OS-managed network + probe  |
//!
//! Firmware builds replace both with drivers for the radio and the on-chip
//! HTTP client; the core logic is unchanged.
//!
//! ## HTTP
//!
//! - One request per call, no internal retries. Undelivered payloads wait
//!   in the pending queue instead.
//! - Any status line is an answer: `401`, `503` and friends come back as a
//!   `Response`. Only failures without a status become `TransportError`.
//! - `multipart/form-data` bodies are encoded by hand; `ureq` only sends
//!   the bytes.
//!
//! ## Example Usage
//!
//! ```no_run
//! use fieldlink_connectors::http::{HttpConfig, HttpTransport};
//! use fieldlink_core::traits::{Request, Transport};
//!
//! let config = HttpConfig::new()
//!     .timeout_secs(10)
//!     .header("X-Site", "greenhouse-3");
//! let mut http = HttpTransport::new(config)?;
//!
//! let request = Request::json("https://backend.example/api/data/ambient", "{}")
//!     .authorization("Device a1");
//! let response = http.post(&request)?;
//! println!("status {}", response.status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]

pub mod host_link;

#[cfg(feature = "http")]
pub mod http;

pub use host_link::HostLink;

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpError, HttpTransport};

use std::sync::{Mutex, MutexGuard};

/// Request counters kept by every adapter
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Requests that got an answer (any status)
    pub requests_answered: u64,
    /// Requests that failed without a status
    pub requests_failed: u64,
    /// Total body bytes sent
    pub bytes_sent: u64,
    /// Number of link re-establishments
    pub reconnections: u32,
    /// Last transport error message
    pub last_error: Option<String>,
}

impl ConnectionStats {
    pub(crate) fn record_answer(&mut self, bytes: usize) {
        self.requests_answered += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_failure(&mut self, error: impl ToString) {
        self.requests_failed += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Lock that survives a panicked holder; the counters stay usable
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
