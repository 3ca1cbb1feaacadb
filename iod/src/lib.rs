pub mod common;
pub mod dx;
pub mod gsps;
pub mod inputs;
pub mod mpps;
pub mod rdsr;

pub use common::{read_dataset_file, write_dataset_file};
pub use xrc_dicom_net::sop_class;
pub use dx::{ImageKind, build_image};
pub use gsps::{PresentationInputs, build_presentation_state};
pub use inputs::{DeviceIdentity, ExposureInfo, PixelDescription, StudyIdentity};
pub use mpps::{MppsEndState, mpps_end, mpps_in_progress};
pub use rdsr::{DoseReportInputs, build_dose_report};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mandatory attribute missing or empty: {0}")]
    MissingAttribute(&'static str),
    #[error("Dataset encoding error: {0}")]
    Encode(String),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
