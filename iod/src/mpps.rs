use crate::common::{cgy_cm2_to_dgy_cm2, da, tm, verify_mandatory};
use crate::inputs::{DeviceIdentity, ExposureInfo, StudyIdentity};
use crate::Result;
use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT, MODALITY, PATIENT_BIRTH_DATE,
    PATIENT_ID, PATIENT_NAME, PATIENT_SEX, PERFORMED_PROCEDURE_STEP_DESCRIPTION,
    PERFORMED_PROCEDURE_STEP_END_DATE, PERFORMED_PROCEDURE_STEP_END_TIME,
    PERFORMED_PROCEDURE_STEP_ID, PERFORMED_PROCEDURE_STEP_START_DATE,
    PERFORMED_PROCEDURE_STEP_START_TIME, PERFORMED_PROCEDURE_STEP_STATUS,
    PERFORMED_SERIES_SEQUENCE, PERFORMED_STATION_AE_TITLE, PERFORMED_STATION_NAME,
    REFERENCED_IMAGE_SEQUENCE, REFERENCED_SOP_CLASS_UID, REFERENCED_SOP_INSTANCE_UID,
    REQUESTED_PROCEDURE_ID, SCHEDULED_PROCEDURE_STEP_ID, SCHEDULED_STEP_ATTRIBUTES_SEQUENCE,
    SERIES_INSTANCE_UID, STUDY_INSTANCE_UID, TOTAL_NUMBER_OF_EXPOSURES,
};
use dicom_object::InMemDicomObject;

/// Final state reported for a performed procedure step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MppsEndState {
    Completed,
    Discontinued,
}

impl MppsEndState {
    fn as_str(self) -> &'static str {
        match self {
            MppsEndState::Completed => "COMPLETED",
            MppsEndState::Discontinued => "DISCONTINUED",
        }
    }
}

/// N-CREATE dataset announcing the step as IN PROGRESS.
///
/// For an unscheduled (emergency) study the scheduled-step item carries the
/// locally generated accession and no scheduled ids, which is how the RIS
/// recognizes unscheduled performed steps.
pub fn mpps_in_progress(
    study: &StudyIdentity,
    device: &DeviceIdentity,
    mpps_id: &str,
    started_at: &DateTime<Utc>,
) -> Result<InMemDicomObject> {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(PATIENT_NAME, VR::PN, &study.patient_name);
    obj.put_str(PATIENT_ID, VR::LO, &study.patient_id);
    obj.put_str(
        PATIENT_BIRTH_DATE,
        VR::DA,
        study.patient_birth_date.as_deref().unwrap_or(""),
    );
    obj.put_str(
        PATIENT_SEX,
        VR::CS,
        study.patient_sex.as_deref().unwrap_or(""),
    );
    obj.put_str(PERFORMED_PROCEDURE_STEP_ID, VR::SH, mpps_id);
    obj.put_str(PERFORMED_STATION_AE_TITLE, VR::AE, &device.station_aet);
    obj.put_str(PERFORMED_STATION_NAME, VR::SH, &device.station_name);
    obj.put_str(PERFORMED_PROCEDURE_STEP_START_DATE, VR::DA, &da(started_at));
    obj.put_str(PERFORMED_PROCEDURE_STEP_START_TIME, VR::TM, &tm(started_at));
    obj.put_str(PERFORMED_PROCEDURE_STEP_STATUS, VR::CS, "IN PROGRESS");
    obj.put_str(
        PERFORMED_PROCEDURE_STEP_DESCRIPTION,
        VR::LO,
        if study.unscheduled {
            "UNSCHEDULED EMERGENCY ACQUISITION"
        } else {
            "X-ray acquisition"
        },
    );
    obj.put_str(MODALITY, VR::CS, "DX");

    let mut scheduled = InMemDicomObject::new_empty();
    scheduled.put_str(STUDY_INSTANCE_UID, VR::UI, &study.study_uid);
    scheduled.put_str(ACCESSION_NUMBER, VR::SH, &study.accession_number);
    scheduled.put_str(
        REQUESTED_PROCEDURE_ID,
        VR::SH,
        study.requested_procedure_id.as_deref().unwrap_or(""),
    );
    scheduled.put_str(
        SCHEDULED_PROCEDURE_STEP_ID,
        VR::SH,
        study.scheduled_step_id.as_deref().unwrap_or(""),
    );
    obj.put(DataElement::new(
        SCHEDULED_STEP_ATTRIBUTES_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(vec![scheduled]),
    ));

    verify_mandatory(&obj, MANDATORY_CREATE)?;
    Ok(obj)
}

/// N-SET dataset closing the step.
///
/// Lists every acquired image (accepted and rejected alike) and the
/// cumulative dose; a clean-start recovery sends this with
/// [`MppsEndState::Discontinued`] and no series.
pub fn mpps_end(
    exposures: &[ExposureInfo],
    image_sop_class: &str,
    total_dap_cgy_cm2: f64,
    end_state: MppsEndState,
    ended_at: &DateTime<Utc>,
) -> Result<InMemDicomObject> {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(PERFORMED_PROCEDURE_STEP_STATUS, VR::CS, end_state.as_str());
    obj.put_str(PERFORMED_PROCEDURE_STEP_END_DATE, VR::DA, &da(ended_at));
    obj.put_str(PERFORMED_PROCEDURE_STEP_END_TIME, VR::TM, &tm(ended_at));
    obj.put(DataElement::new(
        TOTAL_NUMBER_OF_EXPOSURES,
        VR::US,
        PrimitiveValue::from(exposures.len() as u16),
    ));
    obj.put(DataElement::new(
        IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT,
        VR::DS,
        PrimitiveValue::from(cgy_cm2_to_dgy_cm2(total_dap_cgy_cm2).to_string()),
    ));

    // Group images per series for the performed series sequence.
    let mut series: Vec<(String, Vec<InMemDicomObject>)> = vec![];
    for exposure in exposures {
        let mut image = InMemDicomObject::new_empty();
        image.put_str(REFERENCED_SOP_CLASS_UID, VR::UI, image_sop_class);
        image.put_str(
            REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            &exposure.sop_instance_uid,
        );
        match series.iter_mut().find(|(uid, _)| uid == &exposure.series_uid) {
            Some((_, images)) => images.push(image),
            None => series.push((exposure.series_uid.clone(), vec![image])),
        }
    }
    let series_items: Vec<InMemDicomObject> = series
        .into_iter()
        .map(|(series_uid, images)| {
            let mut item = InMemDicomObject::new_empty();
            item.put_str(SERIES_INSTANCE_UID, VR::UI, &series_uid);
            item.put(DataElement::new(
                REFERENCED_IMAGE_SEQUENCE,
                VR::SQ,
                DataSetSequence::from(images),
            ));
            item
        })
        .collect();
    if !series_items.is_empty() {
        obj.put(DataElement::new(
            PERFORMED_SERIES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(series_items),
        ));
    }

    verify_mandatory(&obj, MANDATORY_END)?;
    Ok(obj)
}

pub const MANDATORY_CREATE: &[(dicom_core::Tag, &str)] = &[
    (PATIENT_NAME, "PatientName"),
    (PATIENT_ID, "PatientID"),
    (PERFORMED_PROCEDURE_STEP_ID, "PerformedProcedureStepID"),
    (PERFORMED_STATION_AE_TITLE, "PerformedStationAETitle"),
    (PERFORMED_PROCEDURE_STEP_START_DATE, "PerformedProcedureStepStartDate"),
    (PERFORMED_PROCEDURE_STEP_START_TIME, "PerformedProcedureStepStartTime"),
    (PERFORMED_PROCEDURE_STEP_STATUS, "PerformedProcedureStepStatus"),
    (MODALITY, "Modality"),
    (SCHEDULED_STEP_ATTRIBUTES_SEQUENCE, "ScheduledStepAttributesSequence"),
];

pub const MANDATORY_END: &[(dicom_core::Tag, &str)] = &[
    (PERFORMED_PROCEDURE_STEP_STATUS, "PerformedProcedureStepStatus"),
    (PERFORMED_PROCEDURE_STEP_END_DATE, "PerformedProcedureStepEndDate"),
    (PERFORMED_PROCEDURE_STEP_END_TIME, "PerformedProcedureStepEndTime"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::element_str;
    use crate::dx::tests::{device, exposure, study};
    use xrc_dicom_net::sop_class;

    #[test]
    fn in_progress_carries_scheduled_attributes() {
        let obj = mpps_in_progress(&study(), &device(), "PPS-1", &Utc::now()).unwrap();
        assert_eq!(
            element_str(&obj, PERFORMED_PROCEDURE_STEP_STATUS).unwrap(),
            "IN PROGRESS"
        );
        let scheduled = obj
            .element(SCHEDULED_STEP_ATTRIBUTES_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(
            element_str(&scheduled[0], ACCESSION_NUMBER).unwrap(),
            "ACC-1001"
        );
    }

    #[test]
    fn unscheduled_step_is_described_as_such() {
        let mut emergency = study();
        emergency.unscheduled = true;
        emergency.requested_procedure_id = None;
        emergency.scheduled_step_id = None;
        let obj = mpps_in_progress(&emergency, &device(), "PPS-1", &Utc::now()).unwrap();
        assert!(element_str(&obj, PERFORMED_PROCEDURE_STEP_DESCRIPTION)
            .unwrap()
            .contains("UNSCHEDULED"));
    }

    #[test]
    fn completed_step_lists_every_image_and_the_dose() {
        let mut second = exposure();
        second.sop_instance_uid = "1.2.3.100.2".to_string();
        second.rejected = true;
        let obj = mpps_end(
            &[exposure(), second],
            sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            25.0,
            MppsEndState::Completed,
            &Utc::now(),
        )
        .unwrap();
        assert_eq!(
            element_str(&obj, PERFORMED_PROCEDURE_STEP_STATUS).unwrap(),
            "COMPLETED"
        );
        let series = obj
            .element(PERFORMED_SERIES_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        let images = series[0]
            .element(REFERENCED_IMAGE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(
            element_str(&obj, IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT).unwrap(),
            "2.5"
        );
    }

    #[test]
    fn discontinued_step_needs_no_series() {
        let obj = mpps_end(
            &[],
            sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            0.0,
            MppsEndState::Discontinued,
            &Utc::now(),
        )
        .unwrap();
        assert_eq!(
            element_str(&obj, PERFORMED_PROCEDURE_STEP_STATUS).unwrap(),
            "DISCONTINUED"
        );
        assert!(obj.element(PERFORMED_SERIES_SEQUENCE).is_err());
    }
}
