pub mod alert;
pub mod api;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestration;
pub mod poller;
pub mod reading;
pub mod ring_buffer;
pub mod store;
pub mod transport;
pub mod watchdog;

pub use alert::{AlertEvent, AlertLog, AlertSeverity, AlertSource};
pub use camera::{enforce_retention, CameraMonitor, RetentionResult};
pub use config::{
    AlertConfig, ApiConfig, CameraConfig, LabwatchConfig, SensorConfig, StoreConfig,
    WatchdogConfig,
};
pub use dispatch::{AlertDispatcher, AlertQueue};
pub use error::{
    ConnectivityError, LabwatchError, NotifyError, Result, TransportError, ValidationError,
};
pub use orchestration::LabwatchOrchestrator;
pub use poller::{ReadOutcome, SensorCycle, SensorPoller};
pub use reading::{
    CameraCapture, CaptureStatus, ReadingStatus, SensorKind, SensorReading, StatusSnapshot,
    WatchdogState,
};
pub use ring_buffer::ReadingBuffer;
pub use store::StatusStore;
pub use transport::{
    AlertNotifier, CameraTransport, ControllerProbe, HttpNotifier, LogNotifier, SensorTransport,
    SimulatedCamera, SimulatedSensor, TcpProbe,
};
pub use watchdog::{ConnectivityWatchdog, ProbeOutcome, Watchdog, WatchdogTransition};
