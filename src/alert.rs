use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Which cyclic task produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Sensor,
    Camera,
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Recovery and other informational events.
    Info,
    Warning,
    Critical,
}

/// An alert condition decided by a producer task. Immutable after creation
/// except for the `acknowledged` flag, which the API may flip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub source: AlertSource,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl AlertEvent {
    pub fn new(source: AlertSource, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            severity,
            message: message.into(),
            created_at: Utc::now(),
            acknowledged: false,
        }
    }

    /// Short description used in log lines.
    pub fn description(&self) -> String {
        format!("[{:?}/{:?}] {}", self.source, self.severity, self.message)
    }
}

/// Bounded, time-ordered alert log. Oldest entries are evicted once the
/// capacity is exceeded; entries reach this log only after the dispatcher
/// has attempted to forward them.
#[derive(Debug)]
pub struct AlertLog {
    entries: VecDeque<AlertEvent>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Alert log capacity must be greater than 0");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an alert, evicting the oldest entry if at capacity.
    pub fn push(&mut self, event: AlertEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    /// The `limit` most recent alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AlertEvent> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Page of alerts created strictly before `before`, newest first.
    pub fn page(&self, before: Option<DateTime<Utc>>, limit: usize) -> Vec<AlertEvent> {
        self.entries
            .iter()
            .rev()
            .filter(|e| before.map_or(true, |cutoff| e.created_at < cutoff))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Flip the `acknowledged` flag for an alert id. Idempotent: returns
    /// true whenever the id is present in the current log window, whether or
    /// not it was already acknowledged.
    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// True if any critical alert in the window is still unacknowledged.
    pub fn has_active_critical(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.severity == AlertSeverity::Critical && !e.acknowledged)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(message: &str, severity: AlertSeverity) -> AlertEvent {
        AlertEvent::new(AlertSource::Sensor, severity, message)
    }

    #[test]
    fn test_log_evicts_oldest_at_capacity() {
        let mut log = AlertLog::new(3);
        for i in 0..5 {
            log.push(alert(&format!("alert {}", i), AlertSeverity::Warning));
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(10);
        assert_eq!(recent[0].message, "alert 4");
        assert_eq!(recent[2].message, "alert 2");
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let mut log = AlertLog::new(4);
        let event = alert("stuck valve", AlertSeverity::Critical);
        let id = event.id;
        log.push(event);

        assert!(log.acknowledge(id));
        assert!(log.acknowledge(id));
        assert!(log.recent(1)[0].acknowledged);
    }

    #[test]
    fn test_acknowledge_unknown_id() {
        let mut log = AlertLog::new(4);
        log.push(alert("ph drift", AlertSeverity::Warning));
        assert!(!log.acknowledge(Uuid::new_v4()));
    }

    #[test]
    fn test_active_critical_cleared_by_ack() {
        let mut log = AlertLog::new(4);
        let event = alert("controller down", AlertSeverity::Critical);
        let id = event.id;
        log.push(event);
        log.push(alert("ph drift", AlertSeverity::Warning));

        assert!(log.has_active_critical());
        log.acknowledge(id);
        assert!(!log.has_active_critical());
    }

    #[test]
    fn test_page_by_timestamp_newest_first() {
        let mut log = AlertLog::new(10);
        let mut events = Vec::new();
        for i in 0..4 {
            let mut event = alert(&format!("alert {}", i), AlertSeverity::Info);
            event.created_at = Utc::now() - chrono::Duration::seconds(10 - i);
            events.push(event.clone());
            log.push(event);
        }

        let page = log.page(Some(events[3].created_at), 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message, "alert 2");
        assert_eq!(page[1].message, "alert 1");

        let first_page = log.page(None, 2);
        assert_eq!(first_page[0].message, "alert 3");
    }
}
