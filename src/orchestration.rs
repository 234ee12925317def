use crate::api;
use crate::camera::CameraMonitor;
use crate::config::{LabwatchConfig, SensorConfig};
use crate::dispatch::{AlertDispatcher, AlertQueue};
use crate::error::Result;
use crate::poller::SensorPoller;
use crate::store::StatusStore;
use crate::transport::{
    AlertNotifier, CameraTransport, HttpNotifier, LogNotifier, SensorTransport, SimulatedCamera,
    SimulatedSensor, TcpProbe,
};
use crate::watchdog::ConnectivityWatchdog;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Delay before a panicked cyclic task is respawned.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Owns the shared state and the lifecycle of every cyclic task. Components
/// receive their handles at construction; there is no ambient/static access
/// to the store or queue.
pub struct LabwatchOrchestrator {
    config: LabwatchConfig,
    store: Arc<StatusStore>,
    queue: Arc<AlertQueue>,
    cancel: CancellationToken,
}

impl LabwatchOrchestrator {
    pub fn new(config: LabwatchConfig) -> Self {
        let store = Arc::new(StatusStore::new(
            config.store.history_capacity,
            config.alerts.log_capacity,
        ));
        let queue = Arc::new(AlertQueue::new(
            config.alerts.queue_capacity,
            store.alerts_dropped_handle(),
        ));
        Self {
            config,
            store,
            queue,
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> Arc<StatusStore> {
        Arc::clone(&self.store)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start every component and run until ctrl-c or cancellation.
    pub async fn run(self) -> Result<()> {
        info!("Starting labwatch agent");

        // Bind the API first so startup fails loudly on a bad address.
        let (addr, api_handle) = api::serve(
            &self.config.api,
            Arc::clone(&self.store),
            self.config.alerts.recent_in_snapshot,
            self.cancel.clone(),
        )
        .await?;
        info!("Status API ready on {}", addr);

        let mut handles: Vec<JoinHandle<()>> = vec![api_handle];

        // Alert dispatcher.
        {
            let config = self.config.alerts.clone();
            let queue = Arc::clone(&self.queue);
            let store = Arc::clone(&self.store);
            let cancel = self.cancel.clone();
            handles.push(spawn_supervised("dispatcher", self.cancel.clone(), move || {
                let dispatcher = AlertDispatcher::new(
                    &config,
                    Arc::clone(&queue),
                    Arc::clone(&store),
                    build_notifier(config.notify_url.as_deref()),
                );
                dispatcher.run(cancel.clone())
            }));
        }

        // One poller per configured sensor; each runs independently.
        for sensor in &self.config.sensors {
            let sensor = sensor.clone();
            let simulate = self.config.simulate;
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let cancel = self.cancel.clone();
            let name = format!("sensor-{}", sensor.id);
            handles.push(spawn_supervised_named(name, self.cancel.clone(), move || {
                SensorPoller::new(
                    sensor.clone(),
                    sensor_transport(&sensor, simulate),
                    Arc::clone(&store),
                    Arc::clone(&queue),
                )
                .run(cancel.clone())
            }));
        }

        // Camera capture cycle.
        if self.config.camera.enabled {
            let config = self.config.camera.clone();
            let simulate = self.config.simulate;
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let cancel = self.cancel.clone();
            handles.push(spawn_supervised("camera", self.cancel.clone(), move || {
                CameraMonitor::new(
                    config.clone(),
                    camera_transport(simulate),
                    Arc::clone(&store),
                    Arc::clone(&queue),
                )
                .run(cancel.clone())
            }));
        } else {
            info!("Camera capture disabled by configuration");
        }

        // Connectivity watchdog.
        {
            let config = self.config.watchdog.clone();
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let cancel = self.cancel.clone();
            handles.push(spawn_supervised("watchdog", self.cancel.clone(), move || {
                let probe = TcpProbe::new(config.controller_addr.clone(), config.timeout());
                ConnectivityWatchdog::new(
                    config.clone(),
                    Box::new(probe),
                    Arc::clone(&store),
                    Arc::clone(&queue),
                )
                .run(cancel.clone())
            }));
        }

        info!(
            "All components started ({} sensors, camera: {}, controller: {})",
            self.config.sensors.len(),
            self.config.camera.enabled,
            self.config.watchdog.controller_addr
        );

        // Run until a shutdown signal or external cancellation.
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                self.cancel.cancel();
            }
            _ = self.cancel.cancelled() => {
                info!("Cancellation requested");
            }
        }

        // Give tasks a bounded window to drain and exit.
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("A task did not stop within the shutdown window");
            }
        }

        info!("Labwatch agent stopped");
        Ok(())
    }
}

/// Choose the notification backend: HTTP when an endpoint is configured,
/// local logging otherwise.
fn build_notifier(notify_url: Option<&str>) -> Box<dyn AlertNotifier> {
    match notify_url {
        Some(url) => Box::new(HttpNotifier::new(url)),
        None => Box::new(LogNotifier),
    }
}

/// Sensor bus backend for one poller. Only the simulated backend is linked
/// in; real hardware plugs in through `SensorTransport`. Outside simulation
/// mode the fallback is announced so an operator can tell the readings are
/// not coming from the bench.
fn sensor_transport(sensor: &SensorConfig, simulate: bool) -> Box<dyn SensorTransport> {
    if !simulate {
        warn!(
            "No hardware backend for sensor {}; falling back to simulated data",
            sensor.id
        );
    }
    Box::new(SimulatedSensor::new(sensor.kind))
}

/// Camera backend, selected the same way as the sensor transports.
fn camera_transport(simulate: bool) -> Box<dyn CameraTransport> {
    if !simulate {
        warn!("No camera hardware backend; falling back to simulated frames");
    }
    Box::new(SimulatedCamera)
}

fn spawn_supervised<F, Fut>(name: &'static str, cancel: CancellationToken, factory: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    spawn_supervised_named(name.to_string(), cancel, factory)
}

/// Run a cyclic task under supervision: a panic in one task is logged and
/// the task respawned after a delay, leaving every other task untouched.
fn spawn_supervised_named<F, Fut>(
    name: String,
    cancel: CancellationToken,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let mut task = tokio::spawn(factory());
            tokio::select! {
                _ = cancel.cancelled() => {
                    // The inner future observes the same token; give it a
                    // moment, then make sure it is gone.
                    if tokio::time::timeout(Duration::from_secs(3), &mut task).await.is_err() {
                        task.abort();
                    }
                    break;
                }
                result = &mut task => {
                    match result {
                        Ok(()) => break,
                        Err(e) if e.is_panic() => {
                            error!("Task {} panicked; restarting in {:?}", name, RESTART_DELAY);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(RESTART_DELAY) => {}
                            }
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    })
}
