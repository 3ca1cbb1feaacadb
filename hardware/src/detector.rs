use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorStatus {
    NotReady,
    Ready,
    Acquiring,
    Fault,
}

/// Static detector description reported by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub model: String,
    pub rows: u32,
    pub columns: u32,
    /// Pixel pitch in micrometers
    pub pixel_pitch_um: f64,
}

/// Acquisition parameters for a single exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Protocol name, for the driver's own logging only
    pub protocol: String,
    /// Watchdog window; the acquisition fails when no image arrives in time
    pub watchdog_ms: u64,
}

/// Operation set of the flat-panel detector.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn start_acquisition(&self, config: AcquisitionConfig) -> Result<()>;
    async fn stop_acquisition(&self) -> Result<()>;
    async fn status(&self) -> Result<DetectorStatus>;
    async fn info(&self) -> Result<DetectorInfo>;
}
