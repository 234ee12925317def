use crate::reading::SensorKind;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Immutable agent configuration, loaded once at startup and passed to every
/// component constructor. Thresholds are never mutated mid-process.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LabwatchConfig {
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,

    /// Run every hardware transport in simulation mode. Used on dev machines
    /// and when the bench hardware is absent.
    #[serde(default)]
    pub simulate: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// Stable sensor identifier used in readings and API documents.
    pub id: String,

    /// Sensor kind (determines unit and plausible range).
    pub kind: SensorKind,

    /// Polling interval in seconds.
    #[serde(default = "default_sensor_interval")]
    pub interval_seconds: u64,

    /// Per-read timeout in seconds.
    #[serde(default = "default_sensor_timeout")]
    pub timeout_seconds: u64,

    /// Warning band: readings outside [warn_min, warn_max] are out of range.
    #[serde(default = "default_warn_min")]
    pub warn_min: f64,
    #[serde(default = "default_warn_max")]
    pub warn_max: f64,

    /// Critical band: deviations beyond [critical_min, critical_max]
    /// escalate the out-of-range alert to critical.
    #[serde(default = "default_critical_min")]
    pub critical_min: f64,
    #[serde(default = "default_critical_max")]
    pub critical_max: f64,

    /// Consecutive read failures before a critical alert is raised.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl SensorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Enable the camera capture cycle.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capture interval in seconds.
    #[serde(default = "default_camera_interval")]
    pub interval_seconds: u64,

    /// Per-capture timeout in seconds.
    #[serde(default = "default_camera_timeout")]
    pub timeout_seconds: u64,

    /// Directory where frames are stored.
    #[serde(default = "default_camera_path")]
    pub path: String,

    /// Maximum number of stored frames (strict FIFO eviction).
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,

    /// Disk quota for stored frames, in bytes.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Consecutive capture failures before a warning alert is raised.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl CameraConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_seconds: default_camera_interval(),
            timeout_seconds: default_camera_timeout(),
            path: default_camera_path(),
            max_frames: default_max_frames(),
            quota_bytes: default_quota_bytes(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchdogConfig {
    /// Primary controller address probed for reachability.
    #[serde(default = "default_controller_addr")]
    pub controller_addr: String,

    /// Probe interval in seconds (shorter than the alert threshold window).
    #[serde(default = "default_probe_interval")]
    pub interval_seconds: u64,

    /// Per-probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,

    /// Consecutive failed probes before the UP -> DOWN transition.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            controller_addr: default_controller_addr(),
            interval_seconds: default_probe_interval(),
            timeout_seconds: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    /// Capacity of the producer -> dispatcher queue (drop-oldest on full).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the in-memory alert log window.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Alerts included in each status snapshot.
    #[serde(default = "default_recent_in_snapshot")]
    pub recent_in_snapshot: usize,

    /// Window within which consecutive identical alerts are deduplicated.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_seconds: u64,

    /// Durable alert log file (JSON lines).
    #[serde(default = "default_alert_log_path")]
    pub log_path: String,

    /// Notification collaborator endpoint; delivery is best-effort.
    #[serde(default)]
    pub notify_url: Option<String>,
}

impl AlertConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_seconds)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            log_capacity: default_log_capacity(),
            recent_in_snapshot: default_recent_in_snapshot(),
            dedup_window_seconds: default_dedup_window(),
            log_path: default_alert_log_path(),
            notify_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// IP address to bind to.
    #[serde(default = "default_api_ip")]
    pub ip: String,

    /// Port to listen on.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ip: default_api_ip(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// Per-sensor reading history capacity.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
        }
    }
}

impl LabwatchConfig {
    /// Load configuration from default sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("labwatch.toml")
    }

    /// Load configuration from a specific file path. The file is optional;
    /// defaults apply for every missing field and `LABWATCH_*` environment
    /// variables override both.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("LABWATCH").separator("__"))
            .build()?;

        let config: LabwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensors.is_empty() {
            return Err(ConfigError::Message(
                "At least one sensor must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for sensor in &self.sensors {
            if sensor.id.is_empty() {
                return Err(ConfigError::Message("Sensor id must not be empty".to_string()));
            }
            if !seen.insert(&sensor.id) {
                return Err(ConfigError::Message(format!(
                    "Duplicate sensor id: {}",
                    sensor.id
                )));
            }
            if sensor.interval_seconds == 0 || sensor.timeout_seconds == 0 {
                return Err(ConfigError::Message(format!(
                    "Sensor {} interval and timeout must be greater than 0",
                    sensor.id
                )));
            }
            if sensor.failure_threshold == 0 {
                return Err(ConfigError::Message(format!(
                    "Sensor {} failure_threshold must be greater than 0",
                    sensor.id
                )));
            }
            if sensor.warn_min >= sensor.warn_max {
                return Err(ConfigError::Message(format!(
                    "Sensor {} warning band is empty ({} >= {})",
                    sensor.id, sensor.warn_min, sensor.warn_max
                )));
            }
            if sensor.critical_min > sensor.warn_min || sensor.critical_max < sensor.warn_max {
                return Err(ConfigError::Message(format!(
                    "Sensor {} critical band must contain the warning band",
                    sensor.id
                )));
            }
        }

        if self.camera.interval_seconds == 0 || self.camera.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Camera interval and timeout must be greater than 0".to_string(),
            ));
        }
        if self.camera.max_frames == 0 || self.camera.quota_bytes == 0 {
            return Err(ConfigError::Message(
                "Camera max_frames and quota_bytes must be greater than 0".to_string(),
            ));
        }

        if self.watchdog.interval_seconds == 0 || self.watchdog.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "Watchdog interval and failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.alerts.queue_capacity == 0 || self.alerts.log_capacity == 0 {
            return Err(ConfigError::Message(
                "Alert queue and log capacities must be greater than 0".to_string(),
            ));
        }

        if self.store.history_capacity == 0 {
            return Err(ConfigError::Message(
                "Reading history capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LabwatchConfig {
    fn default() -> Self {
        Self {
            sensors: default_sensors(),
            camera: CameraConfig::default(),
            watchdog: WatchdogConfig::default(),
            alerts: AlertConfig::default(),
            api: ApiConfig::default(),
            store: StoreConfig::default(),
            simulate: false,
        }
    }
}

// Default value functions

/// The bench ships with one pH and one temperature probe; bands match the
/// lab's documented operating ranges.
fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            id: "ph".to_string(),
            kind: SensorKind::Ph,
            interval_seconds: default_sensor_interval(),
            timeout_seconds: default_sensor_timeout(),
            warn_min: 4.0,
            warn_max: 10.0,
            critical_min: 2.0,
            critical_max: 12.0,
            failure_threshold: default_failure_threshold(),
        },
        SensorConfig {
            id: "temperature".to_string(),
            kind: SensorKind::Temperature,
            interval_seconds: default_sensor_interval(),
            timeout_seconds: default_sensor_timeout(),
            warn_min: 15.0,
            warn_max: 45.0,
            critical_min: 5.0,
            critical_max: 60.0,
            failure_threshold: default_failure_threshold(),
        },
    ]
}

fn default_sensor_interval() -> u64 {
    10
}
fn default_sensor_timeout() -> u64 {
    5
}
fn default_warn_min() -> f64 {
    4.0
}
fn default_warn_max() -> f64 {
    10.0
}
fn default_critical_min() -> f64 {
    2.0
}
fn default_critical_max() -> f64 {
    12.0
}
fn default_failure_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}
fn default_camera_interval() -> u64 {
    30
}
fn default_camera_timeout() -> u64 {
    10
}
fn default_camera_path() -> String {
    "./lab-data/camera".to_string()
}
fn default_max_frames() -> usize {
    2880
}
fn default_quota_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_controller_addr() -> String {
    "192.168.1.100:8000".to_string()
}
fn default_probe_interval() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    3
}

fn default_queue_capacity() -> usize {
    64
}
fn default_log_capacity() -> usize {
    256
}
fn default_recent_in_snapshot() -> usize {
    20
}
fn default_dedup_window() -> u64 {
    60
}
fn default_alert_log_path() -> String {
    "./lab-data/logs/alerts.log".to_string()
}

fn default_api_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    5555
}

fn default_history_capacity() -> usize {
    360
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LabwatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensors.len(), 2);
        assert_eq!(config.camera.interval_seconds, 30);
        assert_eq!(config.watchdog.interval_seconds, 5);
    }

    #[test]
    fn test_validation_rejects_empty_warning_band() {
        let mut config = LabwatchConfig::default();
        config.sensors[0].warn_min = 9.0;
        config.sensors[0].warn_max = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_sensor_ids() {
        let mut config = LabwatchConfig::default();
        config.sensors[1].id = config.sensors[0].id.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_critical_band_around_warning_band() {
        let mut config = LabwatchConfig::default();
        config.sensors[0].critical_max = config.sensors[0].warn_max - 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacities() {
        let mut config = LabwatchConfig::default();
        config.alerts.queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = LabwatchConfig::default();
        config.camera.max_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = LabwatchConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: LabwatchConfig = toml::from_str(&rendered).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.sensors.len(), config.sensors.len());
    }
}
