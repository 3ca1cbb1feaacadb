use crate::common::{code_item, code_sequence, da, tm, verify_mandatory};
use crate::inputs::{DeviceIdentity, ExposureInfo, StudyIdentity};
use crate::Result;
use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, COMPLETION_FLAG, CONCEPT_NAME_CODE_SEQUENCE, CONTENT_DATE,
    CONTENT_SEQUENCE, CONTENT_TIME, CONTINUITY_OF_CONTENT, INSTANCE_NUMBER, MANUFACTURER,
    MEASURED_VALUE_SEQUENCE, MEASUREMENT_UNITS_CODE_SEQUENCE, MODALITY, NUMERIC_VALUE,
    PATIENT_ID, PATIENT_NAME, RELATIONSHIP_TYPE, SERIES_INSTANCE_UID, SERIES_NUMBER,
    SOP_CLASS_UID, SOP_INSTANCE_UID, STUDY_INSTANCE_UID, TEXT_VALUE, VALUE_TYPE,
    VERIFICATION_FLAG,
};
use dicom_object::InMemDicomObject;
use xrc_dicom_net::sop_class;

/// Inputs for one dose-report line.
///
/// Rejected exposures appear in the report, flagged as such; their dose was
/// delivered regardless of image acceptance.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseReportInputs {
    pub study: StudyIdentity,
    pub device: DeviceIdentity,
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub exposures: Vec<ExposureInfo>,
    pub total_dap_cgy_cm2: f64,
    pub created_at: DateTime<Utc>,
}

fn num_content_item(meaning: (&str, &str, &str), value: f64, flagged_rejected: bool) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    item.put_str(RELATIONSHIP_TYPE, VR::CS, "CONTAINS");
    item.put_str(VALUE_TYPE, VR::CS, "NUM");
    item.put(code_sequence(
        CONCEPT_NAME_CODE_SEQUENCE,
        code_item(meaning.0, meaning.1, meaning.2),
    ));
    let mut measured = InMemDicomObject::new_empty();
    measured.put(DataElement::new(
        NUMERIC_VALUE,
        VR::DS,
        PrimitiveValue::from(value.to_string()),
    ));
    measured.put(code_sequence(
        MEASUREMENT_UNITS_CODE_SEQUENCE,
        code_item("cGy.cm2", "UCUM", "cGy.cm2"),
    ));
    item.put(DataElement::new(
        MEASURED_VALUE_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(vec![measured]),
    ));
    if flagged_rejected {
        let mut note = InMemDicomObject::new_empty();
        note.put_str(RELATIONSHIP_TYPE, VR::CS, "HAS PROPERTIES");
        note.put_str(VALUE_TYPE, VR::CS, "TEXT");
        note.put(code_sequence(
            CONCEPT_NAME_CODE_SEQUENCE,
            code_item("121106", "DCM", "Comment"),
        ));
        note.put_str(TEXT_VALUE, VR::UT, "Rejected for quality; dose delivered");
        item.put(DataElement::new(
            CONTENT_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![note]),
        ));
    }
    item
}

/// Builds the X-Ray Radiation Dose SR for a closed study.
///
/// The document root is the accumulated study DAP; one numeric child exists
/// per irradiation event, rejected ones carrying a comment item.
pub fn build_dose_report(inputs: &DoseReportInputs) -> Result<InMemDicomObject> {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(SOP_CLASS_UID, VR::UI, sop_class::XRAY_RADIATION_DOSE_SR_STORAGE);
    obj.put_str(SOP_INSTANCE_UID, VR::UI, &inputs.sop_instance_uid);
    obj.put_str(STUDY_INSTANCE_UID, VR::UI, &inputs.study.study_uid);
    obj.put_str(SERIES_INSTANCE_UID, VR::UI, &inputs.series_uid);
    obj.put_str(MODALITY, VR::CS, "SR");
    obj.put_str(PATIENT_NAME, VR::PN, &inputs.study.patient_name);
    obj.put_str(PATIENT_ID, VR::LO, &inputs.study.patient_id);
    obj.put_str(ACCESSION_NUMBER, VR::SH, &inputs.study.accession_number);
    obj.put_str(MANUFACTURER, VR::LO, &inputs.device.manufacturer);
    obj.put_str(CONTENT_DATE, VR::DA, &da(&inputs.created_at));
    obj.put_str(CONTENT_TIME, VR::TM, &tm(&inputs.created_at));
    obj.put(DataElement::new(
        SERIES_NUMBER,
        VR::IS,
        PrimitiveValue::from("1"),
    ));
    obj.put(DataElement::new(
        INSTANCE_NUMBER,
        VR::IS,
        PrimitiveValue::from("1"),
    ));
    obj.put_str(VALUE_TYPE, VR::CS, "CONTAINER");
    obj.put(code_sequence(
        CONCEPT_NAME_CODE_SEQUENCE,
        code_item("113701", "DCM", "X-Ray Radiation Dose Report"),
    ));
    obj.put_str(CONTINUITY_OF_CONTENT, VR::CS, "SEPARATE");
    obj.put_str(COMPLETION_FLAG, VR::CS, "COMPLETE");
    obj.put_str(VERIFICATION_FLAG, VR::CS, "UNVERIFIED");

    let mut content: Vec<InMemDicomObject> = vec![num_content_item(
        ("113722", "DCM", "Dose Area Product Total"),
        inputs.total_dap_cgy_cm2,
        false,
    )];
    for exposure in &inputs.exposures {
        content.push(num_content_item(
            ("113738", "DCM", "Dose Area Product"),
            exposure.dap_cgy_cm2,
            exposure.rejected,
        ));
    }
    obj.put(DataElement::new(
        CONTENT_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(content),
    ));

    verify_mandatory(&obj, MANDATORY)?;
    Ok(obj)
}

pub const MANDATORY: &[(dicom_core::Tag, &str)] = &[
    (SOP_CLASS_UID, "SOPClassUID"),
    (SOP_INSTANCE_UID, "SOPInstanceUID"),
    (STUDY_INSTANCE_UID, "StudyInstanceUID"),
    (SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (MODALITY, "Modality"),
    (PATIENT_NAME, "PatientName"),
    (PATIENT_ID, "PatientID"),
    (CONTENT_DATE, "ContentDate"),
    (CONTENT_TIME, "ContentTime"),
    (CONCEPT_NAME_CODE_SEQUENCE, "ConceptNameCodeSequence"),
    (CONTENT_SEQUENCE, "ContentSequence"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dx::tests::{device, exposure, study};

    fn inputs() -> DoseReportInputs {
        let mut rejected = exposure();
        rejected.sop_instance_uid = "1.2.3.100.2".to_string();
        rejected.rejected = true;
        rejected.rejection_reason = Some("motion blur".to_string());
        DoseReportInputs {
            study: study(),
            device: device(),
            sop_instance_uid: "1.2.3.100.200".to_string(),
            series_uid: "1.2.3.100.20".to_string(),
            exposures: vec![exposure(), rejected],
            total_dap_cgy_cm2: 25.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn report_contains_total_and_per_exposure_items() {
        let obj = build_dose_report(&inputs()).unwrap();
        let content = obj.element(CONTENT_SEQUENCE).unwrap().items().unwrap();
        // One total plus two irradiation events.
        assert_eq!(content.len(), 3);
    }

    #[test]
    fn rejected_exposures_are_flagged_separately() {
        let obj = build_dose_report(&inputs()).unwrap();
        let content = obj.element(CONTENT_SEQUENCE).unwrap().items().unwrap();
        let flagged: Vec<_> = content
            .iter()
            .filter(|item| item.element(CONTENT_SEQUENCE).is_ok())
            .collect();
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn report_without_exposures_still_carries_the_total() {
        let mut empty = inputs();
        empty.exposures.clear();
        empty.total_dap_cgy_cm2 = 0.0;
        let obj = build_dose_report(&empty).unwrap();
        let content = obj.element(CONTENT_SEQUENCE).unwrap().items().unwrap();
        assert_eq!(content.len(), 1);
    }
}
