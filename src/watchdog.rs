use crate::alert::{AlertEvent, AlertSeverity, AlertSource};
use crate::config::WatchdogConfig;
use crate::dispatch::AlertQueue;
use crate::reading::WatchdogState;
use crate::store::StatusStore;
use crate::transport::ControllerProbe;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one controller probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

/// State transition produced by an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTransition {
    /// UP -> DOWN after the debounce threshold was reached.
    Lost,
    /// DOWN -> UP on the first successful probe.
    Recovered,
}

/// Two-state (UP/DOWN) connectivity machine with debounce. The counter is
/// plain data, so the transition logic is testable without a clock or real
/// probes.
///
/// UP -> DOWN only after `threshold` consecutive failures; while DOWN,
/// further failures produce no transition (no duplicate paging). One success
/// resets the counter and, if DOWN, transitions back to UP.
#[derive(Debug)]
pub struct Watchdog {
    threshold: u32,
    state: WatchdogState,
}

impl Watchdog {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            state: WatchdogState::default(),
        }
    }

    /// Feed one probe outcome into the machine.
    pub fn observe(
        &mut self,
        now: DateTime<Utc>,
        outcome: ProbeOutcome,
    ) -> Option<WatchdogTransition> {
        match outcome {
            ProbeOutcome::Success => {
                self.state.last_success_at = Some(now);
                self.state.consecutive_failures = 0;
                if self.state.alert_active {
                    self.state.alert_active = false;
                    Some(WatchdogTransition::Recovered)
                } else {
                    None
                }
            }
            ProbeOutcome::Failure => {
                self.state.consecutive_failures += 1;
                if !self.state.alert_active && self.state.consecutive_failures >= self.threshold {
                    self.state.alert_active = true;
                    Some(WatchdogTransition::Lost)
                } else {
                    None
                }
            }
        }
    }

    pub fn state(&self) -> &WatchdogState {
        &self.state
    }
}

/// Cyclic task probing the primary controller and maintaining the store's
/// watchdog sub-state.
pub struct ConnectivityWatchdog {
    config: WatchdogConfig,
    probe: Box<dyn ControllerProbe>,
    store: Arc<StatusStore>,
    queue: Arc<AlertQueue>,
    machine: Watchdog,
}

impl ConnectivityWatchdog {
    pub fn new(
        config: WatchdogConfig,
        probe: Box<dyn ControllerProbe>,
        store: Arc<StatusStore>,
        queue: Arc<AlertQueue>,
    ) -> Self {
        let machine = Watchdog::new(config.failure_threshold);
        Self {
            config,
            probe,
            store,
            queue,
            machine,
        }
    }

    /// Run probe cycles until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Connectivity watchdog started (controller: {}, interval: {}s, threshold: {})",
            self.config.controller_addr,
            self.config.interval_seconds,
            self.config.failure_threshold
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Connectivity watchdog stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                }
            }
        }
    }

    /// One probe cycle: bounded probe, state machine update, store write,
    /// alert emission on transitions.
    async fn cycle(&mut self) {
        let outcome =
            match tokio::time::timeout(self.config.timeout(), self.probe.probe()).await {
                Ok(Ok(())) => {
                    debug!("Controller {} reachable", self.config.controller_addr);
                    ProbeOutcome::Success
                }
                Ok(Err(e)) => {
                    debug!("Controller probe failed: {}", e);
                    ProbeOutcome::Failure
                }
                Err(_) => {
                    debug!(
                        "Controller probe timed out after {:?}",
                        self.config.timeout()
                    );
                    ProbeOutcome::Failure
                }
            };

        let transition = self.machine.observe(Utc::now(), outcome);

        let state = self.machine.state().clone();
        self.store.update_watchdog(move |w| *w = state);

        match transition {
            Some(WatchdogTransition::Lost) => {
                warn!(
                    "Primary controller {} declared DOWN after {} consecutive failed probes",
                    self.config.controller_addr, self.config.failure_threshold
                );
                self.queue.push(AlertEvent::new(
                    AlertSource::Watchdog,
                    AlertSeverity::Critical,
                    format!(
                        "Primary controller {} unreachable ({} consecutive failed probes)",
                        self.config.controller_addr, self.config.failure_threshold
                    ),
                ));
            }
            Some(WatchdogTransition::Recovered) => {
                info!("Primary controller {} reachable again", self.config.controller_addr);
                self.queue.push(AlertEvent::new(
                    AlertSource::Watchdog,
                    AlertSeverity::Info,
                    format!("Primary controller {} recovered", self.config.controller_addr),
                ));
            }
            None => {}
        }
    }
}
