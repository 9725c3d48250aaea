//! Core domain types for HomeWatch
//!
//! This module defines the decoded sample shapes consumed from the bus and
//! the metering endpoint, and the topic names the daemon routes on.

use serde::Deserialize;

/// Battery level (percent) below which a sensor earns a warning log.
pub const LOW_BATTERY_PERCENT: i64 = 50;

/// Bus topics consumed and produced by the daemon.
pub mod topics {
    /// Telemetry published by the temperature/humidity sensors.
    pub const SENSOR_FILTER: &str = "zigbee2mqtt/sensor/sonoff/snzb02p/#";
    /// Emitted by the doorbell button.
    pub const DOORBELL_PRESSED: &str = "home/doorbell/pressed";
    /// Commands the chime to strike; payload carries the strike count.
    pub const DOORBELL_RING: &str = "home/doorbell/ring";
}

/// One reading from the energy meter endpoint.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct EnergyReading {
    /// Total active energy drawn, in Wh.
    pub east: i64,
    /// Instantaneous apparent power, in VA.
    #[serde(rename = "sinsts")]
    pub sinst: i64,
}

/// One reading from the barometer endpoint. The wire value is in Pa.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct PressureReading {
    pub pressure: f64,
}

impl PressureReading {
    /// Pressure in hPa, the unit persisted and displayed.
    pub fn hectopascal(&self) -> f64 {
        self.pressure / 100.0
    }
}

/// Telemetry record published by a temperature/humidity sensor.
///
/// Sensors attach extra fields (link quality, etc.); anything beyond the
/// three consumed here is ignored during decoding.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SensorReading {
    pub humidity: f64,
    pub temperature: f64,
    /// Remaining battery, in percent.
    pub battery: i64,
}
