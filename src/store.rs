use crate::alert::{AlertEvent, AlertLog};
use crate::error::{LabwatchError, Result};
use crate::reading::{CameraCapture, SensorReading, StatusSnapshot, WatchdogState};
use crate::ring_buffer::ReadingBuffer;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Concurrency-safe in-memory state shared by every task; the single source
/// of truth for the API.
///
/// Each sub-state has its own guard, so a slow sensor write never blocks a
/// camera or watchdog update. `snapshot()` copies sub-state by sub-state and
/// never holds more than one lock at a time; consistency across sub-states
/// is achieved by copying, not by locking them all simultaneously.
pub struct StatusStore {
    started_at: DateTime<Utc>,
    buffer_capacity: usize,
    sensors: RwLock<HashMap<String, ReadingBuffer>>,
    capture: RwLock<Option<CameraCapture>>,
    watchdog: RwLock<WatchdogState>,
    alerts: RwLock<AlertLog>,
    alerts_dropped: Arc<AtomicU64>,
}

impl StatusStore {
    /// Create a store with the given per-sensor buffer capacity and alert
    /// log capacity.
    pub fn new(buffer_capacity: usize, alert_log_capacity: usize) -> Self {
        Self {
            started_at: Utc::now(),
            buffer_capacity,
            sensors: RwLock::new(HashMap::new()),
            capture: RwLock::new(None),
            watchdog: RwLock::new(WatchdogState::default()),
            alerts: RwLock::new(AlertLog::new(alert_log_capacity)),
            alerts_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a reading to the owning sensor's ring buffer, creating the
    /// buffer on first contact.
    pub fn record_sensor_reading(&self, reading: SensorReading) {
        let mut sensors = self.sensors.write();
        sensors
            .entry(reading.sensor_id.clone())
            .or_insert_with(|| ReadingBuffer::new(self.buffer_capacity))
            .push(reading);
    }

    /// Replace the latest-capture pointer.
    pub fn record_capture(&self, capture: CameraCapture) {
        *self.capture.write() = Some(capture);
    }

    /// Most recent capture record, copied out.
    pub fn latest_capture(&self) -> Option<CameraCapture> {
        self.capture.read().clone()
    }

    /// Mutate the watchdog state in place. Only the watchdog task calls
    /// this.
    pub fn update_watchdog<F>(&self, f: F)
    where
        F: FnOnce(&mut WatchdogState),
    {
        f(&mut self.watchdog.write());
    }

    /// Current watchdog state, copied out.
    pub fn watchdog(&self) -> WatchdogState {
        self.watchdog.read().clone()
    }

    /// Append a processed alert to the bounded log.
    pub fn append_alert(&self, event: AlertEvent) {
        self.alerts.write().push(event);
    }

    /// Acknowledge an alert by id. Idempotent; fails only when the id is not
    /// in the current log window.
    pub fn acknowledge_alert(&self, id: Uuid) -> Result<()> {
        if self.alerts.write().acknowledge(id) {
            Ok(())
        } else {
            Err(LabwatchError::AlertNotFound(id))
        }
    }

    /// Page of alerts created before `before`, newest first.
    pub fn alerts_page(&self, before: Option<DateTime<Utc>>, limit: usize) -> Vec<AlertEvent> {
        self.alerts.read().page(before, limit)
    }

    /// Recent readings for one sensor, newest first.
    pub fn sensor_history(&self, sensor_id: &str, limit: usize) -> Result<Vec<SensorReading>> {
        self.sensors
            .read()
            .get(sensor_id)
            .map(|buffer| buffer.recent(limit))
            .ok_or_else(|| LabwatchError::SensorNotFound(sensor_id.to_string()))
    }

    /// Counter shared with the alert queue; incremented there when a full
    /// queue forces an event to be dropped.
    pub fn alerts_dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.alerts_dropped)
    }

    /// Assemble a consistent point-in-time copy of all sub-states.
    pub fn snapshot(&self, recent_alerts: usize) -> StatusSnapshot {
        let sensors: BTreeMap<String, SensorReading> = {
            let guard = self.sensors.read();
            guard
                .iter()
                .filter_map(|(id, buffer)| buffer.latest().cloned().map(|r| (id.clone(), r)))
                .collect()
        };
        let camera = self.capture.read().clone();
        let watchdog = self.watchdog.read().clone();
        let (alerts, active_critical) = {
            let guard = self.alerts.read();
            (guard.recent(recent_alerts), guard.has_active_critical())
        };

        let healthy = watchdog.is_up() && !active_critical;

        StatusSnapshot {
            generated_at: Utc::now(),
            started_at: self.started_at,
            sensors,
            camera,
            watchdog,
            alerts,
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            healthy,
        }
    }
}
