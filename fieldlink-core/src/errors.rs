//! Error Types for the Delivery Layer
//!
//! ## Design Philosophy
//!
//! The device runs unattended, so almost nothing here is allowed to be fatal.
//! Errors are grouped by the subsystem that produces them, and each group
//! carries exactly the context its caller needs to pick a recovery path:
//!
//! 1. **Transient**: a request failed or the server answered something other
//!    than success. Data stays queued and the next reconciliation retries it.
//!
//! 2. **Auth expiry**: the backend answered `401`. The caller runs one token
//!    refresh and retries once.
//!
//! 3. **Terminal auth**: the refresh token itself was rejected or is missing.
//!    The device deactivates and waits for re-activation.
//!
//! 4. **Storage**: the flash volume is missing or an individual file could not
//!    be touched. Persistence degrades to memory-only; queue entries that
//!    cannot be read are discarded.
//!
//! Only [`DeviceError`] describes conditions that stop the device.
//!
//! ## Error Handling Strategy
//!
//! ```rust
//! use fieldlink_core::errors::DeliveryError;
//!
//! fn after_send(result: Result<(), DeliveryError>) {
//!     match result {
//!         Ok(()) => {
//!             // archive the entry
//!         }
//!         Err(DeliveryError::Unauthorized) => {
//!             // refresh the session, retry once
//!         }
//!         Err(_) => {
//!             // leave it pending for the next pass
//!         }
//!     }
//! }
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for flash operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Flash volume errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Directory layout could not be created; every persistence call fails fast
    #[error("Storage unavailable")]
    Unavailable,

    /// A single file or directory operation failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path the operation targeted
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Capacity or usage could not be determined
    #[error("Volume query failed: {0}")]
    Volume(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the targeted file does not exist (vanished between listing and reading)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Client-side request failures; the server never answered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS or TCP connect failed
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Read/write failure or timeout on an established connection
    #[error("I/O failure: {0}")]
    Io(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Outcome of a failed data submission
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Backend rejected the access token (`401`)
    #[error("Access token rejected")]
    Unauthorized,

    /// Backend answered with a non-success status
    #[error("Server responded with status {status}")]
    Rejected {
        /// HTTP status code
        status: u16,
    },

    /// Request never reached the backend
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Device session errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation requires an activated device
    #[error("Device is not activated")]
    NotActivated,

    /// Refresh requested with no refresh token; device was deactivated
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Refresh token rejected by the backend; re-activation required
    #[error("Refresh token rejected")]
    RefreshRejected,

    /// Backend answered with a status the operation does not accept
    #[error("Backend responded with status {status}")]
    Rejected {
        /// HTTP status code, passed through unchanged
        status: u16,
    },

    /// `200` response whose body did not carry the expected tokens
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// Request never reached the backend
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session-state encryption errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// Stored text is not valid base64
    #[error("Invalid encoding")]
    Encoding,

    /// Blob shorter than nonce and tag
    #[error("Sealed blob truncated: {len} bytes")]
    Truncated {
        /// Decoded length
        len: usize,
    },

    /// Tag mismatch: wrong key or tampered data
    #[error("Authentication failed")]
    Authentication,

    /// Encryption itself failed
    #[error("Encryption failed")]
    Seal,
}

/// Station link errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// No credentials configured
    #[error("Link credentials not configured")]
    NotConfigured,

    /// SSID or secret exceeds the station limits
    #[error("{field} longer than {max} bytes")]
    CredentialTooLong {
        /// Which credential
        field: &'static str,
        /// Byte limit
        max: usize,
    },

    /// Driver refused to start an association
    #[error("Association failed: {0}")]
    Association(String),
}

/// Sensor and camera collaborator failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Device did not answer
    #[error("Sensor unavailable: {0}")]
    Unavailable(&'static str),

    /// Frame had the wrong number of readings
    #[error("Expected {expected} readings, got {actual}")]
    FrameSize {
        /// Pixels per frame
        expected: usize,
        /// Pixels received
        actual: usize,
    },

    /// Capture buffer could not be allocated
    #[error("Capture buffer allocation failed")]
    Allocation,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {}: {source}", .path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Document is not valid JSON for the schema
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is outside its allowed range
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Dotted field name
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Conditions that halt the device pending external reset
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Storage directory layout could not be created at startup
    #[error("Storage layout unavailable: {0}")]
    StorageLayout(#[source] StorageError),

    /// The first link setup exhausted its attempts without ever connecting
    #[error("Initial link setup failed after {attempts} attempts")]
    LinkSetupExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Link credentials were rejected before any attempt
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Configuration failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        let err = StorageError::io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = StorageError::io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_not_found());
        assert!(!StorageError::Unavailable.is_not_found());
    }

    #[test]
    fn sensor_errors_name_the_failed_part() {
        assert_eq!(
            SensorError::Unavailable("thermal array").to_string(),
            "Sensor unavailable: thermal array"
        );
        let err = SensorError::FrameSize { expected: 768, actual: 12 };
        assert_eq!(err.to_string(), "Expected 768 readings, got 12");
    }

    #[test]
    fn transport_error_converts_into_delivery_error() {
        let err: DeliveryError = TransportError::Connect("refused".into()).into();
        assert_eq!(err.to_string(), "Connection failed: refused");
    }
}
