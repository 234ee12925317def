use crate::alert::{AlertEvent, AlertSeverity, AlertSource};
use crate::config::CameraConfig;
use crate::dispatch::AlertQueue;
use crate::reading::{CameraCapture, CaptureStatus};
use crate::store::StatusStore;
use crate::transport::CameraTransport;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of one retention pass over the frame directory.
#[derive(Debug, Clone, Default)]
pub struct RetentionResult {
    pub deleted_frames: usize,
    pub deleted_bytes: u64,
    pub remaining_frames: usize,
    pub remaining_bytes: u64,
}

/// Cyclic task capturing one frame per interval and enforcing the disk
/// retention policy over the stored frames.
pub struct CameraMonitor {
    config: CameraConfig,
    transport: Box<dyn CameraTransport>,
    store: Arc<StatusStore>,
    queue: Arc<AlertQueue>,
    sequence: u64,
    consecutive_failures: u32,
    alerted: bool,
}

impl CameraMonitor {
    pub fn new(
        config: CameraConfig,
        transport: Box<dyn CameraTransport>,
        store: Arc<StatusStore>,
        queue: Arc<AlertQueue>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            queue,
            sequence: 0,
            consecutive_failures: 0,
            alerted: false,
        }
    }

    /// Run capture cycles until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Camera monitor started (interval: {}s, path: {}, quota: {} bytes / {} frames)",
            self.config.interval_seconds,
            self.config.path,
            self.config.quota_bytes,
            self.config.max_frames
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Camera monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }
    }

    /// One capture cycle: bounded capture, store the frame, update the
    /// latest-capture pointer, enforce retention. Capture trouble is data,
    /// never a task failure.
    async fn cycle(&mut self) {
        self.sequence += 1;
        let now = Utc::now();

        let frame = match tokio::time::timeout(
            self.config.timeout(),
            self.transport.capture_frame(),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                self.record_failure(format!("capture failed: {}", e)).await;
                return;
            }
            Err(_) => {
                self.record_failure(format!(
                    "capture timed out after {:?}",
                    self.config.timeout()
                ))
                .await;
                return;
            }
        };

        let file_path = self.frame_path(now);
        if let Err(e) = self.write_frame(&file_path, &frame).await {
            self.record_failure(format!("failed to store frame: {}", e)).await;
            return;
        }

        debug!(
            "Saved frame {} ({} bytes): {}",
            self.sequence,
            frame.len(),
            file_path.display()
        );

        self.store.record_capture(CameraCapture {
            sequence_id: self.sequence,
            timestamp: now,
            file_path: Some(file_path),
            status: CaptureStatus::Ok,
        });

        if self.alerted {
            self.queue.push(AlertEvent::new(
                AlertSource::Camera,
                AlertSeverity::Info,
                "Camera capturing again".to_string(),
            ));
        }
        self.consecutive_failures = 0;
        self.alerted = false;

        match enforce_retention(
            Path::new(&self.config.path),
            self.config.max_frames,
            self.config.quota_bytes,
        )
        .await
        {
            Ok(result) if result.deleted_frames > 0 => {
                info!(
                    "Retention pass deleted {} frames ({} bytes), {} frames remain",
                    result.deleted_frames, result.deleted_bytes, result.remaining_frames
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Retention pass failed: {}", e),
        }
    }

    /// Timestamp-derived frame name; the sequence suffix keeps names unique
    /// within one second.
    fn frame_path(&self, now: chrono::DateTime<Utc>) -> PathBuf {
        let name = format!("{}_{:06}.jpg", now.format("%Y%m%d_%H%M%S"), self.sequence);
        Path::new(&self.config.path).join(name)
    }

    async fn write_frame(&self, path: &Path, frame: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, frame).await
    }

    async fn record_failure(&mut self, reason: String) {
        debug!("Camera cycle {} failed: {}", self.sequence, reason);
        self.consecutive_failures += 1;

        self.store.record_capture(CameraCapture {
            sequence_id: self.sequence,
            timestamp: Utc::now(),
            file_path: None,
            status: CaptureStatus::CaptureError,
        });

        // Transient camera hiccups are common; alert only once a small
        // streak accumulates, and only once per streak.
        if !self.alerted && self.consecutive_failures >= self.config.failure_threshold {
            self.alerted = true;
            self.queue.push(AlertEvent::new(
                AlertSource::Camera,
                AlertSeverity::Warning,
                format!(
                    "Camera failed {} consecutive captures: {}",
                    self.consecutive_failures, reason
                ),
            ));
        }
    }
}

/// Enforce the frame retention policy: strict FIFO eviction by capture
/// timestamp (encoded in the file name) while the frame count exceeds
/// `max_frames` or the total size exceeds `quota_bytes`.
pub async fn enforce_retention(
    dir: &Path,
    max_frames: usize,
    quota_bytes: u64,
) -> std::io::Result<RetentionResult> {
    let mut frames: Vec<(PathBuf, u64)> = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        // Nothing stored yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(RetentionResult::default())
        }
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "jpg") {
            let len = entry.metadata().await?.len();
            frames.push((path, len));
        }
    }

    // Timestamp-derived names sort chronologically.
    frames.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));

    let mut total_bytes: u64 = frames.iter().map(|(_, len)| len).sum();
    let mut result = RetentionResult {
        remaining_frames: frames.len(),
        remaining_bytes: total_bytes,
        ..RetentionResult::default()
    };

    let mut oldest_first = frames.into_iter();
    while result.remaining_frames > max_frames || total_bytes > quota_bytes {
        let Some((path, len)) = oldest_first.next() else {
            break;
        };
        tokio::fs::remove_file(&path).await?;
        debug!("Evicted frame: {}", path.display());
        total_bytes -= len;
        result.deleted_frames += 1;
        result.deleted_bytes += len;
        result.remaining_frames -= 1;
        result.remaining_bytes = total_bytes;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::SimulatedCamera;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FailingCamera;

    #[async_trait]
    impl CameraTransport for FailingCamera {
        async fn capture_frame(&self) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::device("no signal"))
        }
    }

    fn camera_config(dir: &TempDir) -> CameraConfig {
        CameraConfig {
            path: dir.path().to_string_lossy().into_owned(),
            failure_threshold: 3,
            ..CameraConfig::default()
        }
    }

    fn monitor(dir: &TempDir, transport: Box<dyn CameraTransport>) -> (CameraMonitor, Arc<StatusStore>, Arc<AlertQueue>) {
        let store = Arc::new(StatusStore::new(8, 32));
        let queue = Arc::new(AlertQueue::new(16, store.alerts_dropped_handle()));
        let monitor = CameraMonitor::new(
            camera_config(dir),
            transport,
            Arc::clone(&store),
            Arc::clone(&queue),
        );
        (monitor, store, queue)
    }

    async fn write_frame(dir: &Path, name: &str, bytes: usize) {
        tokio::fs::write(dir.join(name), vec![0u8; bytes]).await.unwrap();
    }

    #[tokio::test]
    async fn test_count_cap_evicts_exactly_the_oldest_frame() {
        let dir = TempDir::new().unwrap();
        for i in 0..101 {
            write_frame(dir.path(), &format!("20260830_1200{:02}_{:06}.jpg", i % 60, i), 10).await;
        }

        let result = enforce_retention(dir.path(), 100, u64::MAX).await.unwrap();
        assert_eq!(result.deleted_frames, 1);
        assert_eq!(result.remaining_frames, 100);

        // The oldest-timestamped frame is the one that went away.
        assert!(!dir.path().join("20260830_120000_000000.jpg").exists());
        assert!(dir.path().join("20260830_120001_000001.jpg").exists());
    }

    #[tokio::test]
    async fn test_byte_quota_evicts_oldest_first_until_under_quota() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_frame(dir.path(), &format!("20260830_12000{}_{:06}.jpg", i, i), 100).await;
        }

        let result = enforce_retention(dir.path(), 100, 250).await.unwrap();
        assert_eq!(result.deleted_frames, 3);
        assert_eq!(result.remaining_bytes, 200);
        assert!(!dir.path().join("20260830_120000_000000.jpg").exists());
        assert!(dir.path().join("20260830_120004_000004.jpg").exists());
    }

    #[tokio::test]
    async fn test_retention_on_missing_directory_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("never-created");
        let result = enforce_retention(&missing, 10, 1000).await.unwrap();
        assert_eq!(result.deleted_frames, 0);
        assert_eq!(result.remaining_frames, 0);
    }

    #[tokio::test]
    async fn test_successful_cycle_stores_frame_and_updates_pointer() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, store, queue) = monitor(&dir, Box::new(SimulatedCamera));

        monitor.cycle().await;

        let snapshot = store.snapshot(5);
        let capture = snapshot.camera.unwrap();
        assert_eq!(capture.status, CaptureStatus::Ok);
        assert_eq!(capture.sequence_id, 1);
        assert!(capture.file_path.as_ref().unwrap().exists());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_capture_failures_alert_once_after_threshold() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, store, queue) = monitor(&dir, Box::new(FailingCamera));

        monitor.cycle().await;
        monitor.cycle().await;
        assert!(queue.is_empty());

        monitor.cycle().await;
        let alert = queue.pop().await;
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.source, AlertSource::Camera);

        // Still failing: pointer reflects the error, but no re-alert.
        monitor.cycle().await;
        assert!(queue.is_empty());
        assert_eq!(
            store.snapshot(5).camera.unwrap().status,
            CaptureStatus::CaptureError
        );
    }

    #[tokio::test]
    async fn test_recovery_after_failure_streak_emits_info() {
        let dir = TempDir::new().unwrap();
        let (mut monitor, _store, queue) = monitor(&dir, Box::new(FailingCamera));

        for _ in 0..3 {
            monitor.cycle().await;
        }
        let _ = queue.pop().await;

        // Swap in a working transport, as if the device came back.
        monitor.transport = Box::new(SimulatedCamera);
        monitor.cycle().await;

        let alert = queue.pop().await;
        assert_eq!(alert.severity, AlertSeverity::Info);
        assert!(alert.message.contains("again"));
    }
}
