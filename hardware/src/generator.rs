use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeneratorStatus {
    Idle,
    Ready,
    Exposing,
    Fault,
}

/// Focal spot selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FocusSize {
    Small,
    #[default]
    Large,
}

impl FromStr for FocusSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SMALL" | "small" => Ok(FocusSize::Small),
            "LARGE" | "large" => Ok(FocusSize::Large),
            other => Err(format!("invalid focus size: {other}")),
        }
    }
}

/// Technique factors handed to the generator before arming.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureParameters {
    /// Tube voltage in kVp
    pub kvp: f64,
    /// Tube current in mA
    pub ma: f64,
    /// Exposure time in ms
    pub ms: f64,
    pub focus: FocusSize,
}

/// Operation set of the high-voltage generator.
///
/// Implementations are real hardware drivers, simulators or test mocks; the
/// engine only sees this capability set. `abort_exposure` is synchronous so
/// the safety fast-path can fire it without crossing a suspension point.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn set_exposure_parameters(&self, params: ExposureParameters) -> Result<()>;
    async fn arm(&self) -> Result<()>;
    async fn trigger_exposure(&self) -> Result<()>;
    /// Cuts the exposure immediately. Must be callable from any task at any
    /// time and return without waiting on device round-trips.
    fn abort_exposure(&self) -> Result<()>;
    async fn status(&self) -> Result<GeneratorStatus>;
}
