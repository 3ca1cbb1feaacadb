use crate::common::{da, tm, verify_mandatory};
use crate::inputs::{ExposureInfo, StudyIdentity};
use crate::Result;
use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags::{
    CONTENT_DESCRIPTION, CONTENT_LABEL, INSTANCE_NUMBER, MODALITY, PATIENT_ID, PATIENT_NAME,
    PRESENTATION_CREATION_DATE, PRESENTATION_CREATION_TIME, PRESENTATION_LUT_SHAPE,
    REFERENCED_IMAGE_SEQUENCE, REFERENCED_SERIES_SEQUENCE, REFERENCED_SOP_CLASS_UID,
    REFERENCED_SOP_INSTANCE_UID, SERIES_INSTANCE_UID, SERIES_NUMBER, SOP_CLASS_UID,
    SOP_INSTANCE_UID, STUDY_INSTANCE_UID,
};
use dicom_object::InMemDicomObject;
use xrc_dicom_net::sop_class;

/// Inputs for a grayscale softcopy presentation state covering the accepted
/// images of one study.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationInputs {
    pub study: StudyIdentity,
    pub sop_instance_uid: String,
    pub series_uid: String,
    /// Accepted images the state applies to; (image SOP class, exposure)
    pub referenced: Vec<(String, ExposureInfo)>,
    pub created_at: DateTime<Utc>,
}

/// Builds a GSPS object referencing the study's accepted images.
///
/// The state itself is identity: no VOI or spatial transformation is
/// recorded here, review-side adjustments come from the review workstation.
pub fn build_presentation_state(inputs: &PresentationInputs) -> Result<InMemDicomObject> {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(
        SOP_CLASS_UID,
        VR::UI,
        sop_class::GRAYSCALE_SOFTCOPY_PRESENTATION_STATE,
    );
    obj.put_str(SOP_INSTANCE_UID, VR::UI, &inputs.sop_instance_uid);
    obj.put_str(STUDY_INSTANCE_UID, VR::UI, &inputs.study.study_uid);
    obj.put_str(SERIES_INSTANCE_UID, VR::UI, &inputs.series_uid);
    obj.put_str(MODALITY, VR::CS, "PR");
    obj.put_str(PATIENT_NAME, VR::PN, &inputs.study.patient_name);
    obj.put_str(PATIENT_ID, VR::LO, &inputs.study.patient_id);
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
    obj.put_str(CONTENT_LABEL, VR::CS, "ACQ_DEFAULT");
    obj.put_str(CONTENT_DESCRIPTION, VR::LO, "Default acquisition presentation");
    obj.put_str(PRESENTATION_CREATION_DATE, VR::DA, &da(&inputs.created_at));
    obj.put_str(PRESENTATION_CREATION_TIME, VR::TM, &tm(&inputs.created_at));
    obj.put_str(PRESENTATION_LUT_SHAPE, VR::CS, "IDENTITY");

    // Group references per series, preserving insertion order.
    let mut series: Vec<(String, Vec<InMemDicomObject>)> = vec![];
    for (image_sop_class, exposure) in &inputs.referenced {
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
    obj.put(DataElement::new(
        REFERENCED_SERIES_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(series_items),
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
    (CONTENT_LABEL, "ContentLabel"),
    (PRESENTATION_CREATION_DATE, "PresentationCreationDate"),
    (PRESENTATION_LUT_SHAPE, "PresentationLUTShape"),
    (REFERENCED_SERIES_SEQUENCE, "ReferencedSeriesSequence"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dx::tests::{exposure, study};

    #[test]
    fn references_group_by_series() {
        let mut second = exposure();
        second.sop_instance_uid = "1.2.3.100.2".to_string();
        let mut other_series = exposure();
        other_series.sop_instance_uid = "1.2.3.100.3".to_string();
        other_series.series_uid = "1.2.3.100.11".to_string();
        let obj = build_presentation_state(&PresentationInputs {
            study: study(),
            sop_instance_uid: "1.2.3.100.300".to_string(),
            series_uid: "1.2.3.100.30".to_string(),
            referenced: vec![
                (sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(), exposure()),
                (sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(), second),
                (sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(), other_series),
            ],
            created_at: Utc::now(),
        })
        .unwrap();
        let series = obj
            .element(REFERENCED_SERIES_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(series.len(), 2);
        let first_series_images = series[0]
            .element(REFERENCED_IMAGE_SEQUENCE)
            .unwrap()
            .items()
            .unwrap();
        assert_eq!(first_series_images.len(), 2);
    }

    #[test]
    fn state_without_references_is_refused() {
        let result = build_presentation_state(&PresentationInputs {
            study: study(),
            sop_instance_uid: "1.2.3.100.300".to_string(),
            series_uid: "1.2.3.100.30".to_string(),
            referenced: vec![],
            created_at: Utc::now(),
        });
        assert!(result.is_err());
    }
}
