//! Sensor and camera collaborator port

use crate::errors::SensorError;
use crate::payload::AmbientReading;

/// Hardware readings consumed by the orchestrator
///
/// Every method reports failure instead of panicking; a failed capture only
/// aborts the current cycle.
pub trait Sensors {
    /// Light, temperature and humidity; any field may be invalid (`None`)
    fn read_ambient(&mut self) -> AmbientReading;

    /// One thermal frame of [`THERMAL_PIXELS`](crate::constants::THERMAL_PIXELS) readings (°C)
    fn read_thermal_frame(&mut self) -> Result<Vec<f32>, SensorError>;

    /// One JPEG frame from the visual camera
    fn capture_visual(&mut self) -> Result<Vec<u8>, SensorError>;
}
