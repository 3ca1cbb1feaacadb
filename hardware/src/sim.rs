//! Simulator implementations of the hardware capability sets.
//!
//! Used by the console in bench mode and by the engine and safety tests.
//! Behavior is deliberately immediate: no device latencies are modeled, only
//! the status transitions the real drivers report.

use crate::aec::{AecReadiness, AutoExposureControl};
use crate::detector::{AcquisitionConfig, Detector, DetectorInfo, DetectorStatus};
use crate::generator::{ExposureParameters, FocusSize, Generator, GeneratorStatus};
use crate::interlocks::{InterlockSource, InterlockStatus};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug)]
pub struct SimGenerator {
    status: Mutex<GeneratorStatus>,
    params: Mutex<Option<ExposureParameters>>,
    aborts: AtomicUsize,
    fail_arm: Mutex<bool>,
}

impl Default for SimGenerator {
    fn default() -> Self {
        Self {
            status: Mutex::new(GeneratorStatus::Idle),
            params: Mutex::new(None),
            aborts: AtomicUsize::new(0),
            fail_arm: Mutex::new(false),
        }
    }
}

impl SimGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `arm` call report a fault.
    pub fn fail_next_arm(&self) {
        *self.fail_arm.lock().unwrap() = true;
    }

    /// Completes a running exposure, as the real generator does when the
    /// timer or the AEC ends it.
    pub fn finish_exposure(&self) {
        *self.status.lock().unwrap() = GeneratorStatus::Idle;
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<ExposureParameters> {
        *self.params.lock().unwrap()
    }
}

#[async_trait]
impl Generator for SimGenerator {
    async fn set_exposure_parameters(&self, params: ExposureParameters) -> Result<()> {
        *self.params.lock().unwrap() = Some(params);
        Ok(())
    }

    async fn arm(&self) -> Result<()> {
        let mut fail = self.fail_arm.lock().unwrap();
        if *fail {
            *fail = false;
            *self.status.lock().unwrap() = GeneratorStatus::Fault;
            return Err(Error::Generator("arm refused".to_string()));
        }
        if self.params.lock().unwrap().is_none() {
            return Err(Error::InvalidDeviceState(
                "arm requested before exposure parameters were set".to_string(),
            ));
        }
        *self.status.lock().unwrap() = GeneratorStatus::Ready;
        Ok(())
    }

    async fn trigger_exposure(&self) -> Result<()> {
        let mut status = self.status.lock().unwrap();
        if *status != GeneratorStatus::Ready {
            return Err(Error::InvalidDeviceState(format!(
                "trigger requested in {status:?}"
            )));
        }
        *status = GeneratorStatus::Exposing;
        Ok(())
    }

    fn abort_exposure(&self) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap() = GeneratorStatus::Idle;
        debug!("simulated generator abort");
        Ok(())
    }

    async fn status(&self) -> Result<GeneratorStatus> {
        Ok(*self.status.lock().unwrap())
    }
}

#[derive(Debug)]
pub struct SimDetector {
    status: Mutex<DetectorStatus>,
    info: DetectorInfo,
}

impl Default for SimDetector {
    fn default() -> Self {
        Self {
            status: Mutex::new(DetectorStatus::Ready),
            info: DetectorInfo {
                model: "SIM-4343".to_string(),
                rows: 3000,
                columns: 3000,
                pixel_pitch_um: 140.0,
            },
        }
    }
}

impl SimDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the running acquisition as delivered.
    pub fn finish_acquisition(&self) {
        *self.status.lock().unwrap() = DetectorStatus::Ready;
    }

    pub fn set_status(&self, status: DetectorStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl Detector for SimDetector {
    async fn start_acquisition(&self, config: AcquisitionConfig) -> Result<()> {
        debug!("simulated acquisition start for {}", config.protocol);
        let mut status = self.status.lock().unwrap();
        if *status != DetectorStatus::Ready {
            return Err(Error::InvalidDeviceState(format!(
                "acquisition start requested in {status:?}"
            )));
        }
        *status = DetectorStatus::Acquiring;
        Ok(())
    }

    async fn stop_acquisition(&self) -> Result<()> {
        *self.status.lock().unwrap() = DetectorStatus::Ready;
        Ok(())
    }

    async fn status(&self) -> Result<DetectorStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn info(&self) -> Result<DetectorInfo> {
        Ok(self.info.clone())
    }
}

#[derive(Debug, Default)]
pub struct SimAec {
    readiness: Mutex<Option<AecReadiness>>,
}

impl SimAec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_readiness(&self, readiness: AecReadiness) {
        *self.readiness.lock().unwrap() = Some(readiness);
    }
}

#[async_trait]
impl AutoExposureControl for SimAec {
    async fn set_parameters(
        &self,
        chambers: Vec<u8>,
        _density: i8,
        _thickness_cm: f64,
        _kv_priority: bool,
    ) -> Result<()> {
        let mut readiness = self.readiness.lock().unwrap();
        if chambers.is_empty() {
            *readiness = Some(AecReadiness::Error);
            return Err(Error::Aec("no chambers selected".to_string()));
        }
        *readiness = Some(AecReadiness::Ready);
        Ok(())
    }

    async fn readiness(&self) -> Result<AecReadiness> {
        Ok(self
            .readiness
            .lock()
            .unwrap()
            .unwrap_or(AecReadiness::NotConfigured))
    }

    async fn recommended_params(&self, thickness_cm: f64) -> Result<ExposureParameters> {
        // Crude lookup good enough for bench use: thicker patients get more
        // voltage and a longer exposure window.
        Ok(ExposureParameters {
            kvp: 60.0 + 2.0 * thickness_cm,
            ma: 200.0,
            ms: 10.0 + thickness_cm,
            focus: FocusSize::Large,
        })
    }
}

/// Interlock source with setter access for tests and bench scenarios.
#[derive(Debug)]
pub struct SimInterlocks {
    tx: watch::Sender<InterlockStatus>,
}

impl Default for SimInterlocks {
    fn default() -> Self {
        let (tx, _) = watch::channel(InterlockStatus::all_clear());
        Self { tx }
    }
}

impl SimInterlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a mutation to the current snapshot and publishes the result
    /// with a refreshed conjunction and timestamp.
    pub fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut InterlockStatus),
    {
        let mut status = *self.tx.borrow();
        mutate(&mut status);
        let status = InterlockStatus::aggregate(
            status.door_closed,
            status.emergency_stop_clear,
            status.thermal_normal,
            status.generator_ready,
            status.detector_ready,
            status.collimator_valid,
            status.table_locked,
            status.dose_within_limits,
            status.aec_configured,
        );
        let _ = self.tx.send(status);
    }

    pub fn set_door_closed(&self, closed: bool) {
        self.update(|s| s.door_closed = closed);
    }

    pub fn set_dose_within_limits(&self, ok: bool) {
        self.update(|s| s.dose_within_limits = ok);
    }
}

impl InterlockSource for SimInterlocks {
    fn read(&self) -> InterlockStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<InterlockStatus> {
        self.tx.subscribe()
    }
}
