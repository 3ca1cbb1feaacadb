use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the nine hardware interlocks.
///
/// `all_passed` is always the conjunction of the nine booleans; use
/// [`InterlockStatus::aggregate`] to build a snapshot so the invariant
/// cannot drift.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterlockStatus {
    pub door_closed: bool,
    pub emergency_stop_clear: bool,
    pub thermal_normal: bool,
    pub generator_ready: bool,
    pub detector_ready: bool,
    pub collimator_valid: bool,
    pub table_locked: bool,
    pub dose_within_limits: bool,
    pub aec_configured: bool,
    pub all_passed: bool,
    pub at: DateTime<Utc>,
}

impl InterlockStatus {
    /// Builds a snapshot, deriving the conjunction.
    #[allow(clippy::too_many_arguments)]
    pub fn aggregate(
        door_closed: bool,
        emergency_stop_clear: bool,
        thermal_normal: bool,
        generator_ready: bool,
        detector_ready: bool,
        collimator_valid: bool,
        table_locked: bool,
        dose_within_limits: bool,
        aec_configured: bool,
    ) -> Self {
        let all_passed = door_closed
            && emergency_stop_clear
            && thermal_normal
            && generator_ready
            && detector_ready
            && collimator_valid
            && table_locked
            && dose_within_limits
            && aec_configured;
        Self {
            door_closed,
            emergency_stop_clear,
            thermal_normal,
            generator_ready,
            detector_ready,
            collimator_valid,
            table_locked,
            dose_within_limits,
            aec_configured,
            all_passed,
            at: Utc::now(),
        }
    }

    /// A snapshot with every interlock passing.
    pub fn all_clear() -> Self {
        Self::aggregate(true, true, true, true, true, true, true, true, true)
    }

    /// Names of the interlocks that currently fail, in declaration order.
    pub fn failed_names(&self) -> Vec<&'static str> {
        let mut failed = vec![];
        for (name, ok) in self.named() {
            if !ok {
                failed.push(name);
            }
        }
        failed
    }

    /// The nine interlocks with their names, in declaration order.
    pub fn named(&self) -> [(&'static str, bool); 9] {
        [
            ("door_closed", self.door_closed),
            ("emergency_stop_clear", self.emergency_stop_clear),
            ("thermal_normal", self.thermal_normal),
            ("generator_ready", self.generator_ready),
            ("detector_ready", self.detector_ready),
            ("collimator_valid", self.collimator_valid),
            ("table_locked", self.table_locked),
            ("dose_within_limits", self.dose_within_limits),
            ("aec_configured", self.aec_configured),
        ]
    }
}

/// Source of interlock state.
///
/// `read` must be cheap and non-blocking; implementations keep a current
/// snapshot updated from their own signal path. Changes are also pushed
/// through a watch channel so the safety core reacts without polling.
pub trait InterlockSource: Send + Sync {
    fn read(&self) -> InterlockStatus;
    fn subscribe(&self) -> tokio::sync::watch::Receiver<InterlockStatus>;
}
