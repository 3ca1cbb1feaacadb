use crate::Result;
use crate::generator::ExposureParameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AecReadiness {
    NotConfigured,
    Ready,
    Error,
}

/// Operation set of the automatic exposure control.
///
/// The AEC terminates the exposure once the detector signal reaches its
/// threshold; termination is reported as a signal the safety core watches,
/// not through this interface.
#[async_trait]
pub trait AutoExposureControl: Send + Sync {
    /// Configures the measuring chambers and density correction.
    async fn set_parameters(
        &self,
        chambers: Vec<u8>,
        density: i8,
        thickness_cm: f64,
        kv_priority: bool,
    ) -> Result<()>;
    async fn readiness(&self) -> Result<AecReadiness>;
    /// Technique suggestion for the given patient thickness.
    async fn recommended_params(&self, thickness_cm: f64) -> Result<ExposureParameters>;
}
