mod abort;

pub use abort::{AbortNotice, AbortReason, AbortWatch};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};
use xrc_event_bus::{ConsoleEvent, EventBus};
use xrc_hardware::{Detector, Generator, InterlockSource, InterlockStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Hardware fault during safety action: {0}")]
    Hardware(#[from] xrc_hardware::Error),
    #[error("Emergency standby is latched; re-arm before continuing")]
    EmergencyLatched,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Aggregates the nine interlocks and owns the emergency latch.
///
/// Reads are snapshot-based and never block on hardware; the interlock
/// source maintains the current state on its own signal path. Once
/// [`SafetyCore::emergency_standby`] has fired, `emergency_stop_clear`
/// stays false in every snapshot until [`SafetyCore::rearm`] is called.
pub struct SafetyCore {
    source: Arc<dyn InterlockSource>,
    generator: Arc<dyn Generator>,
    detector: Arc<dyn Detector>,
    bus: Arc<EventBus>,
    emergency_latched: AtomicBool,
}

impl SafetyCore {
    pub fn new(
        source: Arc<dyn InterlockSource>,
        generator: Arc<dyn Generator>,
        detector: Arc<dyn Detector>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            source,
            generator,
            detector,
            bus,
            emergency_latched: AtomicBool::new(false),
        }
    }

    /// Current snapshot with the emergency latch applied.
    ///
    /// `all_passed` is recomputed so it stays the conjunction of the nine
    /// booleans even while the latch overrides `emergency_stop_clear`.
    pub fn check_all(&self) -> InterlockStatus {
        let raw = self.source.read();
        if !self.emergency_latched.load(Ordering::SeqCst) {
            return raw;
        }
        InterlockStatus::aggregate(
            raw.door_closed,
            false,
            raw.thermal_normal,
            raw.generator_ready,
            raw.detector_ready,
            raw.collimator_valid,
            raw.table_locked,
            raw.dose_within_limits,
            raw.aec_configured,
        )
    }

    /// Change stream of raw interlock snapshots.
    pub fn subscribe_changes(&self) -> watch::Receiver<InterlockStatus> {
        self.source.subscribe()
    }

    pub fn is_emergency_latched(&self) -> bool {
        self.emergency_latched.load(Ordering::SeqCst)
    }

    /// Drops the machine into a safe state.
    ///
    /// Aborts any running exposure, releases the detector and latches the
    /// emergency stop. The generator abort goes first; it is the only
    /// action with a hard deadline.
    pub async fn emergency_standby(&self) -> Result<()> {
        self.generator.abort_exposure()?;
        self.emergency_latched.store(true, Ordering::SeqCst);
        if let Err(e) = self.detector.stop_acquisition().await {
            warn!("Detector release failed during emergency standby: {}", e);
        }
        self.bus.publish(ConsoleEvent::SafetyAlert {
            code: "EMERGENCY_STANDBY".to_string(),
            detail: "Emergency standby engaged; exposure aborted".to_string(),
        });
        info!("Emergency standby latched");
        Ok(())
    }

    /// Clears the emergency latch after an explicit operator action.
    pub fn rearm(&self) {
        self.emergency_latched.store(false, Ordering::SeqCst);
        info!("Emergency latch cleared");
        self.bus.publish(ConsoleEvent::OperatorNotification {
            severity: xrc_event_bus::Severity::Info,
            code: "EMERGENCY_REARMED".to_string(),
            detail: "Emergency stop re-armed".to_string(),
        });
    }

    /// Forwards interlock changes to the bus until the core is dropped.
    ///
    /// Publishes an `InterlockChanged` event whenever the conjunction or a
    /// member changes.
    pub fn spawn_change_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(self);
        let mut rx = self.source.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                core.bus.publish(ConsoleEvent::InterlockChanged {
                    all_passed: status.all_passed,
                    failed: status
                        .failed_names()
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                    at: status.at,
                });
            }
        })
    }

    pub(crate) fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrc_hardware::sim::{SimDetector, SimGenerator, SimInterlocks};

    fn core_with_sims() -> (Arc<SafetyCore>, Arc<SimInterlocks>, Arc<SimGenerator>) {
        let interlocks = Arc::new(SimInterlocks::new());
        let generator = Arc::new(SimGenerator::new());
        let detector = Arc::new(SimDetector::new());
        let bus = Arc::new(EventBus::new());
        let core = Arc::new(SafetyCore::new(
            interlocks.clone(),
            generator.clone(),
            detector,
            bus,
        ));
        (core, interlocks, generator)
    }

    #[tokio::test]
    async fn check_all_mirrors_the_source() {
        let (core, interlocks, _) = core_with_sims();
        assert!(core.check_all().all_passed);
        interlocks.set_door_closed(false);
        let status = core.check_all();
        assert!(!status.all_passed);
        assert_eq!(status.failed_names(), vec!["door_closed"]);
    }

    #[tokio::test]
    async fn emergency_standby_latches_until_rearm() {
        let (core, _, generator) = core_with_sims();
        core.emergency_standby().await.unwrap();
        assert_eq!(generator.abort_count(), 1);
        let status = core.check_all();
        assert!(!status.emergency_stop_clear);
        assert!(!status.all_passed);
        assert!(core.is_emergency_latched());
        core.rearm();
        assert!(core.check_all().all_passed);
    }

    #[tokio::test]
    async fn change_monitor_publishes_interlock_events() {
        let (core, interlocks, _) = core_with_sims();
        let mut sub = core.bus().subscribe();
        let _monitor = core.spawn_change_monitor();
        interlocks.set_door_closed(false);
        match sub.recv().await.unwrap() {
            ConsoleEvent::InterlockChanged {
                all_passed, failed, ..
            } => {
                assert!(!all_passed);
                assert_eq!(failed, vec!["door_closed".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
