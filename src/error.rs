use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by hardware transports (sensor bus, camera device).
/// Timeouts are enforced by the calling cycle, not by transports, so the
/// only failure a transport reports is device trouble.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device error: {details}")]
    Device { details: String },
}

impl TransportError {
    pub fn device<S: Into<String>>(details: S) -> Self {
        Self::Device {
            details: details.into(),
        }
    }
}

/// A reading outside the physically plausible range for its sensor kind.
/// Distinct from the configured alert band: implausible values are treated
/// as read failures, not as out-of-range measurements.
#[derive(Error, Debug)]
#[error("Implausible {sensor_id} reading {value} (plausible range {min}..{max})")]
pub struct ValidationError {
    pub sensor_id: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// Errors raised while probing the primary controller.
#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("Controller {address} unreachable: {details}")]
    Unreachable { address: String, details: String },

    #[error("Probe of {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}

/// Errors raised while delivering an alert to the notification collaborator.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Delivery failed: {details}")]
    Delivery { details: String },

    #[error("Notification endpoint rejected alert: HTTP {status}")]
    Rejected { status: u16 },
}

#[derive(Error, Debug)]
pub enum LabwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Unknown alert id: {0}")]
    AlertNotFound(Uuid),

    #[error("Unknown sensor id: {0}")]
    SensorNotFound(String),

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

pub type Result<T> = std::result::Result<T, LabwatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_messages_name_the_failing_piece() {
        let err = TransportError::device("no signal");
        assert_eq!(err.to_string(), "Device error: no signal");

        let err = ConnectivityError::Timeout {
            address: "192.168.1.100:8000".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("192.168.1.100:8000"));

        let err = LabwatchError::SensorNotFound("ghost".to_string());
        assert_eq!(err.to_string(), "Unknown sensor id: ghost");
    }
}
