use chrono::{DateTime, Utc};

/// Study-level identity mapped out of the engine's context.
///
/// Carries PHI; instances must never be logged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudyIdentity {
    pub study_uid: String,
    pub accession_number: String,
    pub patient_name: String,
    pub patient_id: String,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
    /// Emergency studies skip the worklist; their objects carry the
    /// unscheduled marker and a locally generated accession.
    pub unscheduled: bool,
    pub requested_procedure_id: Option<String>,
    pub scheduled_step_id: Option<String>,
}

/// The acquiring device as it appears in produced objects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub station_name: String,
    pub station_aet: String,
    pub software_version: String,
}

/// One acquired exposure as the builders see it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureInfo {
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub series_number: u16,
    pub instance_number: u16,
    pub body_part: String,
    pub view_position: String,
    pub kvp: f64,
    pub ma: f64,
    pub exposure_time_ms: f64,
    pub dap_cgy_cm2: f64,
    pub operator_id: String,
    pub acquired_at: DateTime<Utc>,
    pub rejected: bool,
    pub rejection_reason: Option<String>,
}

/// Pixel matrix handed over by the detector pipeline.
///
/// The console does not interpret pixels; it carries them into the image
/// object as delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelDescription {
    pub rows: u16,
    pub columns: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    /// Raw little-endian pixel bytes
    pub pixel_data: Vec<u8>,
}

impl PixelDescription {
    /// A small constant frame for bench and test use.
    pub fn test_pattern(rows: u16, columns: u16) -> Self {
        let len = rows as usize * columns as usize * 2;
        Self {
            rows,
            columns,
            bits_allocated: 16,
            bits_stored: 14,
            high_bit: 13,
            pixel_data: vec![0u8; len],
        }
    }
}
