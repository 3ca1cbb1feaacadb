use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use xrc_config::SafetyLimits;
use xrc_hardware::FocusSize;

/// How the AEC participates in an exposure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AecMode {
    /// Fixed technique, no automatic termination
    Off,
    /// Automatic termination on the selected chambers
    Chambers,
}

/// An acquisition protocol, keyed by body part, projection and device model.
///
/// Every technique factor must lie inside the device safety limits;
/// boundary values are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub body_part: String,
    pub projection: String,
    pub device_model: String,
    pub kvp: f64,
    pub ma: f64,
    pub exposure_time_ms: f64,
    pub aec_mode: AecMode,
    pub aec_chambers: Vec<u8>,
    pub focus: FocusSize,
    pub grid: bool,
    pub procedure_codes: Vec<String>,
}

impl Protocol {
    pub fn aec_enabled(&self) -> bool {
        self.aec_mode != AecMode::Off
    }

    /// Checks the technique factors against the device limits, inclusive.
    pub fn validate_against(&self, limits: &SafetyLimits) -> Result<()> {
        if self.kvp <= 0.0 || self.kvp > limits.max_kvp {
            return Err(Error::ProtocolOutOfBounds {
                field: "kvp",
                value: self.kvp,
                limit: limits.max_kvp,
            });
        }
        if self.ma <= 0.0 || self.ma > limits.max_ma {
            return Err(Error::ProtocolOutOfBounds {
                field: "ma",
                value: self.ma,
                limit: limits.max_ma,
            });
        }
        if self.exposure_time_ms <= 0.0 || self.exposure_time_ms > limits.max_ms {
            return Err(Error::ProtocolOutOfBounds {
                field: "exposure_time_ms",
                value: self.exposure_time_ms,
                limit: limits.max_ms,
            });
        }
        if self.aec_enabled() && self.aec_chambers.is_empty() {
            return Err(Error::InvalidMetadata(
                "AEC mode requires at least one chamber".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureStatus {
    Pending,
    Acquired,
    Accepted,
    Rejected,
    Incomplete,
}

/// One exposure of a study.
///
/// The protocol is snapshotted when the exposure arms; later protocol edits
/// never touch records already taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub protocol: Protocol,
    pub status: ExposureStatus,
    pub dap_cgy_cm2: Option<f64>,
    pub image_sop_uid: Option<String>,
    pub series_uid: String,
    pub dataset_path: Option<std::path::PathBuf>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub operator: String,
    pub rejection_reason: Option<String>,
}

/// Patient identity as confirmed by the operator or the worklist.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatientInfo {
    pub patient_id: String,
    pub patient_name: String,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

/// Worklist linkage of a scheduled study.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorklistRef {
    pub accession_number: String,
    pub requested_procedure_id: String,
    pub scheduled_step_id: String,
}

/// Engine-owned study state.
///
/// Created when a patient is confirmed, scrubbed of PHI before the engine
/// publishes the return to `Idle`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudyContext {
    pub study_uid: String,
    pub accession_number: String,
    pub patient_id: String,
    pub patient_name: String,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub emergency: bool,
    pub worklist_ref: Option<WorklistRef>,
    pub exposures: Vec<ExposureRecord>,
    pub mpps_uid: Option<String>,
    pub mpps_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl StudyContext {
    /// Removes every PHI field, keeping the study skeleton for audit.
    pub fn clear_phi(&mut self) {
        self.patient_id.clear();
        self.patient_name.clear();
        self.birth_date = None;
        self.sex = None;
    }

    pub fn phi_is_clear(&self) -> bool {
        self.patient_id.is_empty()
            && self.patient_name.is_empty()
            && self.birth_date.is_none()
            && self.sex.is_none()
    }

    pub fn accepted_exposures(&self) -> Vec<&ExposureRecord> {
        self.exposures
            .iter()
            .filter(|e| e.status == ExposureStatus::Accepted)
            .collect()
    }

    pub fn total_dap(&self) -> f64 {
        self.exposures
            .iter()
            .filter_map(|e| e.dap_cgy_cm2)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn chest_pa() -> Protocol {
        Protocol {
            name: "XR-CHEST-PA".to_string(),
            body_part: "CHEST".to_string(),
            projection: "PA".to_string(),
            device_model: "HXR-40".to_string(),
            kvp: 125.0,
            ma: 320.0,
            exposure_time_ms: 8.0,
            aec_mode: AecMode::Chambers,
            aec_chambers: vec![0, 2],
            focus: FocusSize::Large,
            grid: true,
            procedure_codes: vec!["RPID1001".to_string()],
        }
    }

    fn limits() -> SafetyLimits {
        SafetyLimits {
            max_kvp: 150.0,
            max_ma: 500.0,
            max_ms: 2000.0,
        }
    }

    #[test]
    fn boundary_values_are_inclusive() {
        let mut protocol = chest_pa();
        protocol.kvp = 150.0;
        assert!(protocol.validate_against(&limits()).is_ok());
        protocol.kvp = 151.0;
        assert!(matches!(
            protocol.validate_against(&limits()),
            Err(Error::ProtocolOutOfBounds { field: "kvp", .. })
        ));
    }

    #[test]
    fn aec_mode_requires_chambers() {
        let mut protocol = chest_pa();
        protocol.aec_chambers.clear();
        assert!(protocol.validate_against(&limits()).is_err());
        protocol.aec_mode = AecMode::Off;
        assert!(protocol.validate_against(&limits()).is_ok());
    }

    #[test]
    fn phi_scrub_clears_every_field() {
        let mut context = StudyContext {
            patient_id: "PAT-7".to_string(),
            patient_name: "Doe^Jane".to_string(),
            birth_date: Some("19701224".to_string()),
            sex: Some("F".to_string()),
            ..StudyContext::default()
        };
        assert!(!context.phi_is_clear());
        context.clear_phi();
        assert!(context.phi_is_clear());
    }
}
