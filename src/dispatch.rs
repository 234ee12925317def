use crate::alert::{AlertEvent, AlertSource};
use crate::config::AlertConfig;
use crate::store::StatusStore;
use crate::transport::AlertNotifier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded multi-producer hand-off between the cyclic tasks and the
/// dispatcher. `push` never blocks: when the queue is full the oldest
/// unforwarded event is dropped and the shared drop counter incremented.
pub struct AlertQueue {
    inner: Mutex<VecDeque<AlertEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: Arc<AtomicU64>,
}

impl AlertQueue {
    pub fn new(capacity: usize, dropped: Arc<AtomicU64>) -> Self {
        assert!(capacity > 0, "Alert queue capacity must be greater than 0");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped,
        }
    }

    /// Enqueue an alert. Drop-oldest on full, never block-on-full.
    pub fn push(&self, event: AlertEvent) {
        {
            let mut queue = self.inner.lock();
            if queue.len() == self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Alert queue full, dropped oldest: {}", dropped.description());
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Dequeue the next alert; waits while the queue is empty. Single
    /// consumer.
    pub async fn pop(&self) -> AlertEvent {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Single consumer of the alert queue: deduplicates, appends to the bounded
/// log, persists the durable record, and forwards to the notification
/// collaborator best-effort.
pub struct AlertDispatcher {
    queue: Arc<AlertQueue>,
    store: Arc<StatusStore>,
    notifier: Box<dyn AlertNotifier>,
    log_path: PathBuf,
    dedup_window: Duration,
    last_processed: Option<(AlertSource, String, DateTime<Utc>)>,
}

impl AlertDispatcher {
    pub fn new(
        config: &AlertConfig,
        queue: Arc<AlertQueue>,
        store: Arc<StatusStore>,
        notifier: Box<dyn AlertNotifier>,
    ) -> Self {
        Self {
            queue,
            store,
            notifier,
            log_path: PathBuf::from(&config.log_path),
            dedup_window: config.dedup_window(),
            last_processed: None,
        }
    }

    /// Drain the queue until cancelled, processing events in arrival order.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Alert dispatcher started (log: {})", self.log_path.display());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Alert dispatcher stopping");
                    break;
                }
                event = self.queue.pop() => {
                    self.process(event).await;
                }
            }
        }
    }

    /// Process one event: dedup, log, persist, forward.
    pub async fn process(&mut self, event: AlertEvent) {
        if self.is_duplicate(&event) {
            debug!("Suppressed duplicate alert: {}", event.description());
            return;
        }
        self.last_processed = Some((event.source, event.message.clone(), event.created_at));

        self.store.append_alert(event.clone());

        if let Err(e) = self.persist(&event).await {
            warn!("Failed to persist alert to {}: {}", self.log_path.display(), e);
        }

        // The log is the durable record; delivery is best-effort.
        match self.notifier.send(&event).await {
            Ok(()) => debug!("Alert forwarded: {}", event.description()),
            Err(e) => error!("Alert delivery failed ({}): {}", event.description(), e),
        }
    }

    /// Consecutive identical (source, message) pairs within the dedup window
    /// are suppressed to avoid flooding the log.
    fn is_duplicate(&self, event: &AlertEvent) -> bool {
        match &self.last_processed {
            Some((source, message, at)) => {
                *source == event.source
                    && *message == event.message
                    && (event.created_at - *at).to_std().map_or(false, |d| d <= self.dedup_window)
            }
            None => false,
        }
    }

    /// Append the event as one JSON line to the durable alert log.
    async fn persist(&self, event: &AlertEvent) -> std::io::Result<()> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(event).map_err(std::io::Error::other)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertSeverity;
    use crate::error::NotifyError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        async fn send(&self, event: &AlertEvent) -> Result<(), NotifyError> {
            self.sent.lock().push(event.message.clone());
            if self.fail {
                Err(NotifyError::Delivery {
                    details: "test failure".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher(
        dir: &TempDir,
        fail_delivery: bool,
    ) -> (AlertDispatcher, Arc<StatusStore>, Arc<Mutex<Vec<String>>>) {
        let store = Arc::new(StatusStore::new(8, 32));
        let queue = Arc::new(AlertQueue::new(8, store.alerts_dropped_handle()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let config = AlertConfig {
            log_path: dir.path().join("alerts.log").to_string_lossy().into_owned(),
            dedup_window_seconds: 60,
            ..AlertConfig::default()
        };
        let dispatcher = AlertDispatcher::new(
            &config,
            queue,
            Arc::clone(&store),
            Box::new(RecordingNotifier {
                sent: Arc::clone(&sent),
                fail: fail_delivery,
            }),
        );
        (dispatcher, store, sent)
    }

    fn alert(message: &str) -> AlertEvent {
        AlertEvent::new(AlertSource::Sensor, AlertSeverity::Warning, message)
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let dropped = Arc::new(AtomicU64::new(0));
        let queue = AlertQueue::new(3, Arc::clone(&dropped));

        for i in 0..5 {
            queue.push(alert(&format!("alert {}", i)));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_queue_pop_preserves_arrival_order() {
        let queue = AlertQueue::new(4, Arc::new(AtomicU64::new(0)));
        queue.push(alert("first"));
        queue.push(alert("second"));

        assert_eq!(queue.pop().await.message, "first");
        assert_eq!(queue.pop().await.message, "second");
    }

    #[tokio::test]
    async fn test_saturated_queue_never_blocks_producers() {
        let dropped = Arc::new(AtomicU64::new(0));
        let queue = AlertQueue::new(2, Arc::clone(&dropped));

        // No consumer running; pushes must all return immediately and the
        // drop counter must grow monotonically.
        let mut last = 0;
        for i in 0..100 {
            queue.push(alert(&format!("alert {}", i)));
            let now = dropped.load(Ordering::Relaxed);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(dropped.load(Ordering::Relaxed), 98);
    }

    #[tokio::test]
    async fn test_dispatcher_appends_persists_and_forwards() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, store, sent) = dispatcher(&dir, false);

        dispatcher.process(alert("ph drift")).await;

        assert_eq!(store.alerts_page(None, 10).len(), 1);
        assert_eq!(sent.lock().as_slice(), ["ph drift"]);

        let persisted = std::fs::read_to_string(dir.path().join("alerts.log")).unwrap();
        let parsed: AlertEvent = serde_json::from_str(persisted.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.message, "ph drift");
    }

    #[tokio::test]
    async fn test_dispatcher_suppresses_consecutive_duplicates() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, store, sent) = dispatcher(&dir, false);

        dispatcher.process(alert("ph drift")).await;
        dispatcher.process(alert("ph drift")).await;
        dispatcher.process(alert("temp spike")).await;
        dispatcher.process(alert("ph drift")).await;

        assert_eq!(store.alerts_page(None, 10).len(), 3);
        assert_eq!(sent.lock().as_slice(), ["ph drift", "temp spike", "ph drift"]);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_event_in_log() {
        let dir = TempDir::new().unwrap();
        let (mut dispatcher, store, sent) = dispatcher(&dir, true);

        dispatcher.process(alert("controller down")).await;

        // Delivery failed, but the event stays in the durable record.
        assert_eq!(sent.lock().len(), 1);
        assert_eq!(store.alerts_page(None, 10).len(), 1);
        let persisted = std::fs::read_to_string(dir.path().join("alerts.log")).unwrap();
        assert!(persisted.contains("controller down"));
    }
}
