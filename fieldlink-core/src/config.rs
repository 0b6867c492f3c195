//! Device configuration
//!
//! One JSON document, every section optional:
//!
//! ```json
//! {
//!   "device":  { "id": 42, "activation_code": "ABC", "mac_address": "aa:bb:cc:dd:ee:ff" },
//!   "wifi":    { "ssid": "field-ap", "secret": "..." },
//!   "backend": { "base_url": "https://api.example.com", "timeout_secs": 10 },
//!   "link":    { "retry_interval_ms": 10000, "attempt_timeout_ms": 20000, "max_attempts": 5 },
//!   "storage": { "root": "/data", "max_age_days": 30, "min_free_percent": 10 },
//!   "collection": { "interval_minutes": 10, "capture": true }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Endpoints;
use crate::constants::{
    DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_COLLECTION_INTERVAL_MINUTES, DEFAULT_HIGH_WATER_PERCENT,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MIN_FREE_PERCENT, DEFAULT_REARM_AFTER_MS, DEFAULT_RETRY_INTERVAL_MS,
    DEFAULT_VOLUME_CAPACITY_BYTES, MAX_AGE_DAYS_LIMIT, WIFI_SECRET_MAX, WIFI_SSID_MAX,
};
use crate::errors::ConfigError;
use crate::link::LinkPolicy;
use crate::storage::EvictionPolicy;

/// Complete device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub wifi: WifiSection,
    pub backend: BackendSection,
    pub link: LinkSection,
    pub storage: StorageSection,
    pub collection: CollectionSection,
}

/// Device identity used for activation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub id: u32,
    pub activation_code: String,
    pub mac_address: Option<String>,
}

/// Station credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiSection {
    pub ssid: heapless::String<WIFI_SSID_MAX>,
    pub secret: heapless::String<WIFI_SECRET_MAX>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub activate_path: String,
    pub auth_path: String,
    pub refresh_path: String,
    pub ambient_path: String,
    pub capture_path: String,
    /// Reachability probe; defaults to the base URL
    pub probe_url: Option<String>,
}

impl Default for BackendSection {
    fn default() -> Self {
        let endpoints = Endpoints::new("");
        Self {
            base_url: String::new(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            activate_path: endpoints.activate,
            auth_path: endpoints.auth_check,
            refresh_path: endpoints.refresh,
            ambient_path: endpoints.ambient,
            capture_path: endpoints.capture,
            probe_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub retry_interval_ms: u64,
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    /// How long a `Failed` link is left alone before retrying again
    pub rearm_after_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rearm_after_ms: DEFAULT_REARM_AFTER_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Root of the flash volume
    pub root: PathBuf,
    /// Key blob directory, kept outside the volume layout
    pub key_store_dir: PathBuf,
    /// Capacity of the partition holding `root`
    pub capacity_bytes: u64,
    pub max_age_days: u32,
    pub min_free_percent: u8,
    pub high_water_percent: u8,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            key_store_dir: PathBuf::from("keys"),
            capacity_bytes: DEFAULT_VOLUME_CAPACITY_BYTES,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            min_free_percent: DEFAULT_MIN_FREE_PERCENT,
            high_water_percent: DEFAULT_HIGH_WATER_PERCENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSection {
    /// Used while the backend has not set an interval (session value `0`)
    pub interval_minutes: u32,
    /// Take thermal/visual captures alongside ambient readings
    pub capture: bool,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_COLLECTION_INTERVAL_MINUTES,
            capture: true,
        }
    }
}

impl DeviceConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &'static str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        }

        if self.wifi.ssid.is_empty() {
            return invalid("wifi.ssid", "must not be empty");
        }
        let url = &self.backend.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return invalid("backend.base_url", "must be an http(s) URL");
        }
        if self.backend.timeout_secs == 0 {
            return invalid("backend.timeout_secs", "must be greater than zero");
        }
        if self.link.attempt_timeout_ms == 0 {
            return invalid("link.attempt_timeout_ms", "must be greater than zero");
        }
        if self.link.max_attempts == 0 {
            return invalid("link.max_attempts", "must be greater than zero");
        }
        if self.storage.capacity_bytes == 0 {
            return invalid("storage.capacity_bytes", "must be greater than zero");
        }
        if self.storage.max_age_days > MAX_AGE_DAYS_LIMIT {
            return invalid("storage.max_age_days", "must be at most 36500");
        }
        if self.storage.min_free_percent > 100 {
            return invalid("storage.min_free_percent", "must be within 0..=100");
        }
        if self.storage.high_water_percent > 100 {
            return invalid("storage.high_water_percent", "must be within 0..=100");
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        let mut endpoints = Endpoints::new(self.backend.base_url.clone());
        endpoints.activate = self.backend.activate_path.clone();
        endpoints.auth_check = self.backend.auth_path.clone();
        endpoints.refresh = self.backend.refresh_path.clone();
        endpoints.ambient = self.backend.ambient_path.clone();
        endpoints.capture = self.backend.capture_path.clone();
        endpoints
    }

    pub fn probe_url(&self) -> String {
        self.backend
            .probe_url
            .clone()
            .unwrap_or_else(|| self.backend.base_url.clone())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    pub fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            retry_interval_ms: self.link.retry_interval_ms,
            attempt_timeout_ms: self.link.attempt_timeout_ms,
            max_attempts: self.link.max_attempts,
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_age_days: self.storage.max_age_days,
            min_free_percent: self.storage.min_free_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "wifi": { "ssid": "field-ap", "secret": "hunter22" },
        "backend": { "base_url": "https://api.example.com/" }
    }"#;

    #[test]
    fn minimal_document_uses_defaults() {
        let config = DeviceConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(config.wifi.ssid.as_str(), "field-ap");
        assert_eq!(config.link_policy(), LinkPolicy::default());
        assert_eq!(config.storage.max_age_days, DEFAULT_MAX_AGE_DAYS);
        assert_eq!(config.collection.interval_minutes, DEFAULT_COLLECTION_INTERVAL_MINUTES);

        let endpoints = config.endpoints();
        assert_eq!(
            endpoints.url(&endpoints.activate),
            "https://api.example.com/api/device/activate"
        );
        assert_eq!(config.probe_url(), "https://api.example.com/");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = DeviceConfig::from_json_str(MINIMAL).unwrap();
        config.backend.base_url = "ftp://x".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "backend.base_url",
                ..
            })
        ));

        let mut config = DeviceConfig::from_json_str(MINIMAL).unwrap();
        config.storage.min_free_percent = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "storage.min_free_percent",
                ..
            })
        ));

        let mut config = DeviceConfig::from_json_str(MINIMAL).unwrap();
        config.storage.max_age_days = 4_000_000_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "storage.max_age_days",
                ..
            })
        ));
        config.storage.max_age_days = MAX_AGE_DAYS_LIMIT;
        assert!(config.validate().is_ok());

        let mut config = DeviceConfig::from_json_str(MINIMAL).unwrap();
        config.link.attempt_timeout_ms = 0;
        assert!(config.validate().is_err());

        assert!(matches!(
            DeviceConfig::from_json_str("{}"),
            Err(ConfigError::Invalid { field: "wifi.ssid", .. })
        ));
    }

    #[test]
    fn overlong_ssid_fails_to_parse() {
        let json = format!(
            r#"{{"wifi":{{"ssid":"{}"}},"backend":{{"base_url":"http://h"}}}}"#,
            "x".repeat(WIFI_SSID_MAX + 1)
        );
        assert!(matches!(
            DeviceConfig::from_json_str(&json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DeviceConfig::from_json_file(dir.path().join("nope.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
