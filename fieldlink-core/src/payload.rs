//! Wire payloads
//!
//! Readings are encoded once, when collected, and the encoded text is what
//! gets sent or queued. The backend contract:
//!
//! ```json
//! {"light":120.5,"temperature":22.1,"humidity":55.0}
//! {"max_temp":31.2,"min_temp":19.8,"avg_temp":24.1,"temperatures":[24.0,null,...]}
//! ```
//!
//! Invalid sensor values are sent as `null`, never as a sentinel number.

use serde::{Deserialize, Serialize};

use crate::constants::THERMAL_PIXELS;
use crate::errors::SensorError;
use crate::storage::CaptureStamp;

/// Ambient sensor reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbientReading {
    /// Illuminance (lux)
    pub light: Option<f32>,
    /// Air temperature (°C)
    pub temperature: Option<f32>,
    /// Relative humidity (%)
    pub humidity: Option<f32>,
}

impl AmbientReading {
    /// Build from raw driver values; NaN and infinities become `None`
    pub fn from_raw(light: f32, temperature: f32, humidity: f32) -> Self {
        Self {
            light: finite(light),
            temperature: finite(temperature),
            humidity: finite(humidity),
        }
    }

    /// True when no sensor produced a value
    pub fn is_empty(&self) -> bool {
        self.light.is_none() && self.temperature.is_none() && self.humidity.is_none()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Thermal array frame with summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalFrame {
    /// Hottest valid pixel
    pub max_temp: Option<f32>,
    /// Coldest valid pixel
    pub min_temp: Option<f32>,
    /// Mean of the valid pixels
    pub avg_temp: Option<f32>,
    /// Row-major pixels; invalid pixels are `null`
    pub temperatures: Vec<Option<f32>>,
}

impl ThermalFrame {
    /// Build a frame from one raw read of the thermal array
    pub fn from_readings(readings: &[f32]) -> Result<Self, SensorError> {
        if readings.len() != THERMAL_PIXELS {
            return Err(SensorError::FrameSize {
                expected: THERMAL_PIXELS,
                actual: readings.len(),
            });
        }

        let temperatures: Vec<Option<f32>> = readings.iter().copied().map(finite).collect();
        let valid = temperatures.iter().flatten().copied();

        let mut max_temp: Option<f32> = None;
        let mut min_temp: Option<f32> = None;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for t in valid {
            max_temp = Some(max_temp.map_or(t, |m| m.max(t)));
            min_temp = Some(min_temp.map_or(t, |m| m.min(t)));
            sum += f64::from(t);
            count += 1;
        }
        let avg_temp = (count > 0).then(|| (sum / count as f64) as f32);

        Ok(Self {
            max_temp,
            min_temp,
            avg_temp,
            temperatures,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One capture cycle, owned until its send attempt completes
///
/// The image buffer is released when the bundle is dropped; nothing is
/// carried over to the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBundle {
    /// When the frames were taken
    pub stamp: CaptureStamp,
    /// Encoded [`ThermalFrame`]
    pub thermal_json: String,
    /// JPEG bytes, when the visual camera delivered a frame
    pub image: Option<Vec<u8>>,
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}
