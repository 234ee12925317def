use crate::alert::AlertEvent;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of environmental sensor on the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ph,
    Temperature,
}

impl SensorKind {
    /// Unit string reported in snapshots for this kind.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Ph => "pH",
            SensorKind::Temperature => "°C",
        }
    }

    /// Physically plausible range for this kind. Values outside it are
    /// treated as read failures rather than measurements.
    pub fn plausible_range(&self) -> (f64, f64) {
        match self {
            SensorKind::Ph => (0.0, 14.0),
            SensorKind::Temperature => (-40.0, 100.0),
        }
    }

    /// Check a raw value against the plausible range.
    pub fn validate(&self, sensor_id: &str, value: f64) -> Result<f64, ValidationError> {
        let (min, max) = self.plausible_range();
        if value.is_finite() && value >= min && value <= max {
            Ok(value)
        } else {
            Err(ValidationError {
                sensor_id: sensor_id.to_string(),
                value,
                min,
                max,
            })
        }
    }
}

/// Outcome of one sensor read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Ok,
    OutOfRange,
    ReadError,
}

/// One immutable sensor observation. Appended to the per-sensor ring buffer
/// and never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub kind: SensorKind,
    /// Measured value; absent when the read failed.
    pub value: Option<f64>,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub status: ReadingStatus,
}

impl SensorReading {
    pub fn new(
        sensor_id: impl Into<String>,
        kind: SensorKind,
        value: Option<f64>,
        timestamp: DateTime<Utc>,
        status: ReadingStatus,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            kind,
            value,
            unit: kind.unit().to_string(),
            timestamp,
            status,
        }
    }
}

/// Outcome of one camera capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Ok,
    CaptureError,
}

/// Metadata for the most recent camera frame. One record replaces the
/// previous on each cycle; the frames themselves live on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraCapture {
    pub sequence_id: u64,
    pub timestamp: DateTime<Utc>,
    /// Path of the stored frame; absent when the capture failed.
    pub file_path: Option<PathBuf>,
    pub status: CaptureStatus,
}

/// Connectivity watchdog state. Mutated only by the watchdog task; read by
/// the API and dispatcher through snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogState {
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub alert_active: bool,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            last_success_at: None,
            consecutive_failures: 0,
            alert_active: false,
        }
    }
}

impl WatchdogState {
    /// True while the controller is considered reachable.
    pub fn is_up(&self) -> bool {
        !self.alert_active
    }
}

/// Consistent point-in-time view of all agent state. This is a copy — it is
/// never aliased back into the mutable store, so readers cannot observe
/// partial writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// Latest reading per sensor id.
    pub sensors: BTreeMap<String, SensorReading>,
    pub camera: Option<CameraCapture>,
    pub watchdog: WatchdogState,
    /// Most recent alerts, newest first.
    pub alerts: Vec<AlertEvent>,
    /// Alerts dropped from a saturated queue since startup.
    pub alerts_dropped: u64,
    /// Healthy iff the watchdog is UP and no unacknowledged critical alert
    /// remains in the log window.
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausible_range_accepts_in_range_values() {
        assert!(SensorKind::Ph.validate("ph-1", 7.2).is_ok());
        assert!(SensorKind::Temperature.validate("temp-1", 23.5).is_ok());
    }

    #[test]
    fn test_plausible_range_rejects_implausible_values() {
        let err = SensorKind::Ph.validate("ph-1", 17.0).unwrap_err();
        assert_eq!(err.sensor_id, "ph-1");
        assert_eq!(err.value, 17.0);

        assert!(SensorKind::Temperature.validate("temp-1", -120.0).is_err());
        assert!(SensorKind::Ph.validate("ph-1", f64::NAN).is_err());
    }

    #[test]
    fn test_reading_carries_kind_unit() {
        let reading = SensorReading::new(
            "temp-1",
            SensorKind::Temperature,
            Some(24.0),
            Utc::now(),
            ReadingStatus::Ok,
        );
        assert_eq!(reading.unit, "°C");
    }

    #[test]
    fn test_watchdog_default_is_up() {
        let state = WatchdogState::default();
        assert!(state.is_up());
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_success_at.is_none());
    }
}
