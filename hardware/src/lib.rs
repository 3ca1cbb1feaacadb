mod aec;
mod detector;
mod generator;
mod interlocks;
pub mod sim;

pub use aec::{AecReadiness, AutoExposureControl};
pub use detector::{AcquisitionConfig, Detector, DetectorInfo, DetectorStatus};
pub use generator::{ExposureParameters, FocusSize, Generator, GeneratorStatus};
pub use interlocks::{InterlockSource, InterlockStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Generator fault: {0}")]
    Generator(String),
    #[error("Detector fault: {0}")]
    Detector(String),
    #[error("AEC fault: {0}")]
    Aec(String),
    #[error("Device is not in a state that allows the request: {0}")]
    InvalidDeviceState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
