//! Signal sampling collaborators
//!
//! [`Sensor`] is the narrow interface the sampling loop reads from.
//! [`GpioSensor`] reads a digital input through the Linux sysfs GPIO
//! interface; [`SimulatedSensor`] toggles between 0 and 1 for bench runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Sensor failures
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("GPIO I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected GPIO reading: {0:?}")]
    InvalidReading(String),
}

/// Source of one-byte samples
pub trait Sensor: Send {
    fn read_sample(&mut self) -> Result<u8, SensorError>;

    /// Pin number reported alongside samples
    fn pin(&self) -> u32;
}

/// Digital input read through sysfs
#[derive(Debug, Clone)]
pub struct GpioSensor {
    pin: u32,
    value_path: PathBuf,
}

impl GpioSensor {
    /// Export `pin` as an input under the default sysfs root
    pub fn open(pin: u32) -> Result<Self, SensorError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin)
    }

    /// Export `pin` as an input under `root`
    pub fn open_at(root: &Path, pin: u32) -> Result<Self, SensorError> {
        let pin_dir = root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            write_sysfs(&root.join("export"), &pin.to_string())?;
            debug!(pin, "Exported GPIO pin");
        }
        write_sysfs(&pin_dir.join("direction"), "in")?;

        Ok(Self {
            pin,
            value_path: pin_dir.join("value"),
        })
    }
}

fn write_sysfs(path: &Path, value: &str) -> Result<(), SensorError> {
    std::fs::write(path, value).map_err(|source| SensorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl Sensor for GpioSensor {
    fn read_sample(&mut self) -> Result<u8, SensorError> {
        let raw = std::fs::read_to_string(&self.value_path).map_err(|source| SensorError::Io {
            path: self.value_path.clone(),
            source,
        })?;

        raw.trim()
            .parse::<u8>()
            .map_err(|_| SensorError::InvalidReading(raw.trim().to_string()))
    }

    fn pin(&self) -> u32 {
        self.pin
    }
}

/// Alternates 0 and 1 on every read
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensor {
    pin: u32,
    level: u8,
}

impl SimulatedSensor {
    pub fn new(pin: u32) -> Self {
        Self { pin, level: 0 }
    }
}

impl Sensor for SimulatedSensor {
    fn read_sample(&mut self) -> Result<u8, SensorError> {
        let value = self.level;
        self.level ^= 1;
        Ok(value)
    }

    fn pin(&self) -> u32 {
        self.pin
    }
}

/// Telemetry payload published for one sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleReading {
    pub device_id: String,
    pub pin: u32,
    pub value: u8,
    pub sampled_at: DateTime<Utc>,
}

impl SampleReading {
    pub fn new(device_id: impl Into<String>, pin: u32, value: u8) -> Self {
        Self {
            device_id: device_id.into(),
            pin,
            value,
            sampled_at: Utc::now(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sysfs(pin: u32) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("export"), "").unwrap();
        let pin_dir = root.path().join(format!("gpio{pin}"));
        std::fs::create_dir(&pin_dir).unwrap();
        std::fs::write(pin_dir.join("direction"), "out").unwrap();
        std::fs::write(pin_dir.join("value"), "1\n").unwrap();
        root
    }

    #[test]
    fn test_gpio_open_sets_input_direction() {
        let root = fake_sysfs(21);
        let sensor = GpioSensor::open_at(root.path(), 21).unwrap();

        assert_eq!(sensor.pin(), 21);
        let direction = std::fs::read_to_string(root.path().join("gpio21/direction")).unwrap();
        assert_eq!(direction, "in");
    }

    #[test]
    fn test_gpio_read_value() {
        let root = fake_sysfs(21);
        let mut sensor = GpioSensor::open_at(root.path(), 21).unwrap();

        assert_eq!(sensor.read_sample().unwrap(), 1);
        std::fs::write(root.path().join("gpio21/value"), "0\n").unwrap();
        assert_eq!(sensor.read_sample().unwrap(), 0);
    }

    #[test]
    fn test_gpio_invalid_reading() {
        let root = fake_sysfs(4);
        let mut sensor = GpioSensor::open_at(root.path(), 4).unwrap();
        std::fs::write(root.path().join("gpio4/value"), "high").unwrap();

        assert!(matches!(
            sensor.read_sample(),
            Err(SensorError::InvalidReading(ref v)) if v == "high"
        ));
    }

    #[test]
    fn test_gpio_missing_root() {
        let result = GpioSensor::open_at(Path::new("/nonexistent/gpio"), 21);
        assert!(matches!(result, Err(SensorError::Io { .. })));
    }

    #[test]
    fn test_simulated_sensor_toggles() {
        let mut sensor = SimulatedSensor::new(21);
        let values: Vec<u8> = (0..4).map(|_| sensor.read_sample().unwrap()).collect();
        assert_eq!(values, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_sample_payload_json() {
        let reading = SampleReading::new("testdev", 21, 1);
        let payload = reading.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["device_id"], "testdev");
        assert_eq!(value["pin"], 21);
        assert_eq!(value["value"], 1);
        assert!(value["sampled_at"].is_string());
    }
}
