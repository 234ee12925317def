use crate::alert::AlertEvent;
use crate::error::{ConnectivityError, NotifyError, TransportError};
use crate::reading::SensorKind;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Sensor bus access: read one value, bounded-time. Implementations cover
/// the real bench hardware and deterministic fakes for tests.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    async fn read(&self) -> Result<f64, TransportError>;
}

/// Camera device access: capture one encoded frame, bounded-time.
#[async_trait]
pub trait CameraTransport: Send + Sync {
    async fn capture_frame(&self) -> Result<Vec<u8>, TransportError>;
}

/// Reachability check against the primary controller.
#[async_trait]
pub trait ControllerProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ConnectivityError>;
}

/// Notification collaborator: accepts an alert and attempts delivery.
/// Fire-and-forget with a success/failure result; no guaranteed delivery.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

/// Deterministic sensor used when the bench hardware is absent or the agent
/// runs with `simulate = true`. Produces a slow waveform inside the kind's
/// normal operating band so the agent exercises its full path end to end.
pub struct SimulatedSensor {
    kind: SensorKind,
    started: Instant,
}

impl SimulatedSensor {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            started: Instant::now(),
        }
    }

    fn waveform(&self, elapsed_secs: f64) -> f64 {
        let (midpoint, amplitude) = match self.kind {
            SensorKind::Ph => (7.0, 0.5),
            SensorKind::Temperature => (24.0, 2.0),
        };
        // One full swing roughly every ten minutes.
        midpoint + amplitude * (elapsed_secs / 600.0 * std::f64::consts::TAU).sin()
    }
}

#[async_trait]
impl SensorTransport for SimulatedSensor {
    async fn read(&self) -> Result<f64, TransportError> {
        let value = self.waveform(self.started.elapsed().as_secs_f64());
        debug!(kind = ?self.kind, value, "Simulated sensor read");
        Ok(value)
    }
}

/// Simulated camera producing a minimal placeholder JPEG per cycle.
pub struct SimulatedCamera;

impl SimulatedCamera {
    /// Build a structurally valid, content-free JPEG (SOI + JFIF header +
    /// EOI with a little padding so retention accounting sees real sizes).
    pub fn placeholder_jpeg() -> Vec<u8> {
        let mut jpeg = Vec::with_capacity(1 << 10);
        // SOI
        jpeg.extend_from_slice(&[0xFF, 0xD8]);
        // APP0 / JFIF
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[0x01, 0x01, 0x01, 0x00, 0x48, 0x00, 0x48, 0x00, 0x00]);
        // COM segment as padding
        let padding = [0x20u8; 512];
        jpeg.extend_from_slice(&[0xFF, 0xFE]);
        jpeg.extend_from_slice(&((padding.len() as u16 + 2).to_be_bytes()));
        jpeg.extend_from_slice(&padding);
        // EOI
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }
}

#[async_trait]
impl CameraTransport for SimulatedCamera {
    async fn capture_frame(&self) -> Result<Vec<u8>, TransportError> {
        debug!("Simulated camera capture");
        Ok(Self::placeholder_jpeg())
    }
}

/// TCP reachability probe against the primary controller.
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ControllerProbe for TcpProbe {
    async fn probe(&self) -> Result<(), ConnectivityError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ConnectivityError::Unreachable {
                address: self.address.clone(),
                details: e.to_string(),
            }),
            Err(_) => Err(ConnectivityError::Timeout {
                address: self.address.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

/// HTTP notifier posting alerts to the remote server's alert intake.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AlertNotifier for HttpNotifier {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery {
                details: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            })
        }
    }
}

/// Fallback notifier used when no endpoint is configured: alerts stay in the
/// durable log and are surfaced here at info level.
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        info!("Alert (no notification endpoint configured): {}", event.description());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_sensor_stays_in_plausible_band() {
        let sensor = SimulatedSensor::new(SensorKind::Ph);
        for _ in 0..10 {
            let value = sensor.read().await.unwrap();
            assert!(value > 6.0 && value < 8.0, "unexpected value {}", value);
        }
    }

    #[tokio::test]
    async fn test_simulated_camera_produces_jpeg_markers() {
        let camera = SimulatedCamera;
        let frame = camera.capture_frame().await.unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        assert!(frame.len() > 100);
    }

    #[tokio::test]
    async fn test_tcp_probe_success_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_failure_reports_unreachable() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.probe().await.is_err());
    }
}
