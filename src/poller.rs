use crate::alert::{AlertEvent, AlertSeverity, AlertSource};
use crate::config::SensorConfig;
use crate::dispatch::AlertQueue;
use crate::reading::{ReadingStatus, SensorReading};
use crate::store::StatusStore;
use crate::transport::SensorTransport;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one read attempt after timeout and plausibility checks.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Value(f64),
    Failed(String),
}

/// Band/failure state for one sensor. Alerts are emitted only on state
/// transitions, which is the same debounce discipline the connectivity
/// watchdog uses: a single blip never pages anyone and a sustained
/// condition pages exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Normal,
    OutOfRange,
    CriticalRange,
    Failed { alerted: bool },
}

/// Pure per-sensor cycle machine: debounce counters as plain data, no timers
/// hidden in control flow.
#[derive(Debug)]
pub struct SensorCycle {
    config: SensorConfig,
    state: CycleState,
    consecutive_failures: u32,
}

impl SensorCycle {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            state: CycleState::Normal,
            consecutive_failures: 0,
        }
    }

    /// Feed one read outcome; returns the reading to record and, on a state
    /// transition, the alert to emit.
    pub fn observe(
        &mut self,
        now: DateTime<Utc>,
        outcome: ReadOutcome,
    ) -> (SensorReading, Option<AlertEvent>) {
        match outcome {
            ReadOutcome::Failed(reason) => self.observe_failure(now, reason),
            ReadOutcome::Value(value) => self.observe_value(now, value),
        }
    }

    fn observe_failure(
        &mut self,
        now: DateTime<Utc>,
        reason: String,
    ) -> (SensorReading, Option<AlertEvent>) {
        self.consecutive_failures += 1;
        let reading = SensorReading::new(
            self.config.id.clone(),
            self.config.kind,
            None,
            now,
            ReadingStatus::ReadError,
        );

        let already_alerted = matches!(self.state, CycleState::Failed { alerted: true });
        let alert = if !already_alerted && self.consecutive_failures >= self.config.failure_threshold
        {
            self.state = CycleState::Failed { alerted: true };
            Some(AlertEvent::new(
                AlertSource::Sensor,
                AlertSeverity::Critical,
                format!(
                    "Sensor {} failed {} consecutive reads: {}",
                    self.config.id, self.consecutive_failures, reason
                ),
            ))
        } else {
            if !already_alerted {
                self.state = CycleState::Failed { alerted: false };
            }
            None
        };

        (reading, alert)
    }

    fn observe_value(
        &mut self,
        now: DateTime<Utc>,
        value: f64,
    ) -> (SensorReading, Option<AlertEvent>) {
        self.consecutive_failures = 0;

        let next = if value < self.config.critical_min || value > self.config.critical_max {
            CycleState::CriticalRange
        } else if value < self.config.warn_min || value > self.config.warn_max {
            CycleState::OutOfRange
        } else {
            CycleState::Normal
        };

        let status = if next == CycleState::Normal {
            ReadingStatus::Ok
        } else {
            ReadingStatus::OutOfRange
        };
        let reading = SensorReading::new(
            self.config.id.clone(),
            self.config.kind,
            Some(value),
            now,
            status,
        );

        let alert = match (self.state, next) {
            (previous, CycleState::CriticalRange) if previous != CycleState::CriticalRange => {
                Some(AlertEvent::new(
                    AlertSource::Sensor,
                    AlertSeverity::Critical,
                    format!(
                        "Sensor {} critically out of range: {} {} (expected {}..{})",
                        self.config.id,
                        value,
                        self.config.kind.unit(),
                        self.config.warn_min,
                        self.config.warn_max
                    ),
                ))
            }
            (previous, CycleState::OutOfRange) if previous != CycleState::OutOfRange => {
                Some(AlertEvent::new(
                    AlertSource::Sensor,
                    AlertSeverity::Warning,
                    format!(
                        "Sensor {} out of range: {} {} (expected {}..{})",
                        self.config.id,
                        value,
                        self.config.kind.unit(),
                        self.config.warn_min,
                        self.config.warn_max
                    ),
                ))
            }
            (CycleState::OutOfRange | CycleState::CriticalRange, CycleState::Normal) => {
                Some(AlertEvent::new(
                    AlertSource::Sensor,
                    AlertSeverity::Info,
                    format!(
                        "Sensor {} back in range: {} {}",
                        self.config.id,
                        value,
                        self.config.kind.unit()
                    ),
                ))
            }
            (CycleState::Failed { alerted: true }, CycleState::Normal) => Some(AlertEvent::new(
                AlertSource::Sensor,
                AlertSeverity::Info,
                format!("Sensor {} reading again: {} {}", self.config.id, value, self.config.kind.unit()),
            )),
            _ => None,
        };

        self.state = next;
        (reading, alert)
    }
}

/// Cyclic task sampling one sensor on its own interval. Each sensor runs
/// independently; a stuck or slow sensor never delays the others.
pub struct SensorPoller {
    config: SensorConfig,
    transport: Box<dyn SensorTransport>,
    store: Arc<StatusStore>,
    queue: Arc<AlertQueue>,
    cycle: SensorCycle,
}

impl SensorPoller {
    pub fn new(
        config: SensorConfig,
        transport: Box<dyn SensorTransport>,
        store: Arc<StatusStore>,
        queue: Arc<AlertQueue>,
    ) -> Self {
        let cycle = SensorCycle::new(config.clone());
        Self {
            config,
            transport,
            store,
            queue,
            cycle,
        }
    }

    /// Run read cycles until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Sensor poller started (sensor: {}, interval: {}s)",
            self.config.id, self.config.interval_seconds
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sensor poller {} stopping", self.config.id);
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// One cycle: bounded read, plausibility check, state machine, store and
    /// queue writes. Transport trouble is data, never a task failure.
    async fn poll_once(&mut self) {
        let outcome =
            match tokio::time::timeout(self.config.timeout(), self.transport.read()).await {
                Ok(Ok(raw)) => match self.config.kind.validate(&self.config.id, raw) {
                    Ok(value) => ReadOutcome::Value(value),
                    Err(e) => {
                        warn!("Discarding implausible reading: {}", e);
                        ReadOutcome::Failed(e.to_string())
                    }
                },
                Ok(Err(e)) => {
                    debug!("Sensor {} read failed: {}", self.config.id, e);
                    ReadOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    debug!(
                        "Sensor {} read timed out after {:?}",
                        self.config.id,
                        self.config.timeout()
                    );
                    ReadOutcome::Failed(format!("read timed out after {:?}", self.config.timeout()))
                }
            };

        let (reading, alert) = self.cycle.observe(Utc::now(), outcome);
        debug!(
            sensor_id = %reading.sensor_id,
            status = ?reading.status,
            value = ?reading.value,
            "Recorded reading"
        );
        self.store.record_sensor_reading(reading);

        if let Some(alert) = alert {
            self.queue.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SensorKind;

    fn sensor_config() -> SensorConfig {
        SensorConfig {
            id: "ph".to_string(),
            kind: SensorKind::Ph,
            interval_seconds: 10,
            timeout_seconds: 5,
            warn_min: 4.0,
            warn_max: 10.0,
            critical_min: 2.0,
            critical_max: 12.0,
            failure_threshold: 3,
        }
    }

    fn failed() -> ReadOutcome {
        ReadOutcome::Failed("bus timeout".to_string())
    }

    #[test]
    fn test_single_transient_failure_produces_no_alert() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        let (reading, alert) = cycle.observe(now, failed());
        assert_eq!(reading.status, ReadingStatus::ReadError);
        assert!(alert.is_none());

        // Success after one blip: reading is ok again, no recovery alert
        // because nothing was ever raised.
        let (reading, alert) = cycle.observe(now, ReadOutcome::Value(7.0));
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert!(alert.is_none());
    }

    #[test]
    fn test_three_consecutive_failures_alert_exactly_once() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        assert!(cycle.observe(now, failed()).1.is_none());
        assert!(cycle.observe(now, failed()).1.is_none());

        let (reading, alert) = cycle.observe(now, failed());
        assert_eq!(reading.status, ReadingStatus::ReadError);
        let alert = alert.expect("third failure should alert");
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.source, AlertSource::Sensor);

        // Continued failure does not re-alert.
        assert!(cycle.observe(now, failed()).1.is_none());

        // Recovery clears the error status and emits one info event.
        let (reading, alert) = cycle.observe(now, ReadOutcome::Value(7.0));
        assert_eq!(reading.status, ReadingStatus::Ok);
        assert_eq!(alert.unwrap().severity, AlertSeverity::Info);
    }

    #[test]
    fn test_out_of_band_value_warns_on_transition_only() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        let (reading, alert) = cycle.observe(now, ReadOutcome::Value(11.0));
        assert_eq!(reading.status, ReadingStatus::OutOfRange);
        assert_eq!(alert.unwrap().severity, AlertSeverity::Warning);

        // Staying out of range emits nothing further.
        let (_, alert) = cycle.observe(now, ReadOutcome::Value(11.2));
        assert!(alert.is_none());
    }

    #[test]
    fn test_wide_band_deviation_escalates_to_critical() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        cycle.observe(now, ReadOutcome::Value(11.0));
        let (reading, alert) = cycle.observe(now, ReadOutcome::Value(13.0));
        assert_eq!(reading.status, ReadingStatus::OutOfRange);
        assert_eq!(alert.unwrap().severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_return_in_band_emits_recovery() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        cycle.observe(now, ReadOutcome::Value(13.0));
        let (reading, alert) = cycle.observe(now, ReadOutcome::Value(7.0));
        assert_eq!(reading.status, ReadingStatus::Ok);
        let alert = alert.unwrap();
        assert_eq!(alert.severity, AlertSeverity::Info);
        assert!(alert.message.contains("back in range"));
    }

    #[test]
    fn test_failure_counter_resets_on_success() {
        let mut cycle = SensorCycle::new(sensor_config());
        let now = Utc::now();

        cycle.observe(now, failed());
        cycle.observe(now, failed());
        cycle.observe(now, ReadOutcome::Value(7.0));

        // The counter restarted, so two more failures stay quiet.
        assert!(cycle.observe(now, failed()).1.is_none());
        assert!(cycle.observe(now, failed()).1.is_none());
        assert!(cycle.observe(now, failed()).1.is_some());
    }
}
