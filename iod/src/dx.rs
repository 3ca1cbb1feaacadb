use crate::common::{cgy_cm2_to_dgy_cm2, da, tm, verify_mandatory};
use crate::inputs::{DeviceIdentity, ExposureInfo, PixelDescription, StudyIdentity};
use crate::{Error, Result};
use dicom_core::{DataElement, PrimitiveValue, VR, smallvec::SmallVec};
use dicom_dictionary_std::tags::{
    ACCESSION_NUMBER, BITS_ALLOCATED, BITS_STORED, BODY_PART_EXAMINED, COLUMNS,
    DEVICE_SERIAL_NUMBER, HIGH_BIT, IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT, INSTANCE_NUMBER,
    KVP, MANUFACTURER, MANUFACTURER_MODEL_NAME, MODALITY, OPERATORS_NAME, PATIENT_BIRTH_DATE,
    PATIENT_ID, PATIENT_NAME, PATIENT_SEX, PHOTOMETRIC_INTERPRETATION, PIXEL_DATA,
    PIXEL_REPRESENTATION, PRESENTATION_INTENT_TYPE, ROWS, SAMPLES_PER_PIXEL, SERIES_INSTANCE_UID,
    SERIES_NUMBER, SOP_CLASS_UID, SOP_INSTANCE_UID, STATION_NAME, STUDY_DATE,
    STUDY_DESCRIPTION, STUDY_INSTANCE_UID, STUDY_TIME, VIEW_POSITION, X_RAY_TUBE_CURRENT,
};
use dicom_object::InMemDicomObject;
use xrc_dicom_net::sop_class;

/// Which image IOD a builder produces.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageKind {
    /// Digital X-Ray, for presentation
    Dx,
    /// Computed radiography
    Cr,
}

impl ImageKind {
    pub fn sop_class_uid(self) -> &'static str {
        match self {
            ImageKind::Dx => sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            ImageKind::Cr => sop_class::CR_IMAGE_STORAGE,
        }
    }

    fn modality(self) -> &'static str {
        match self {
            ImageKind::Dx => "DX",
            ImageKind::Cr => "CR",
        }
    }
}

/// Assembles a DX or CR image object.
///
/// Pure function of its inputs. Fails loudly when a mandatory attribute
/// would come out empty; a partial image object never leaves this builder.
pub fn build_image(
    kind: ImageKind,
    study: &StudyIdentity,
    device: &DeviceIdentity,
    exposure: &ExposureInfo,
    pixel: &PixelDescription,
) -> Result<InMemDicomObject> {
    if pixel.pixel_data.is_empty() {
        return Err(Error::MissingAttribute("PixelData"));
    }
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(SOP_CLASS_UID, VR::UI, kind.sop_class_uid());
    obj.put_str(SOP_INSTANCE_UID, VR::UI, &exposure.sop_instance_uid);
    obj.put_str(STUDY_INSTANCE_UID, VR::UI, &study.study_uid);
    obj.put_str(SERIES_INSTANCE_UID, VR::UI, &exposure.series_uid);
    obj.put_str(MODALITY, VR::CS, kind.modality());
    obj.put_str(PRESENTATION_INTENT_TYPE, VR::CS, "FOR PRESENTATION");

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
    obj.put_str(ACCESSION_NUMBER, VR::SH, &study.accession_number);
    if study.unscheduled {
        obj.put_str(STUDY_DESCRIPTION, VR::LO, "UNSCHEDULED EMERGENCY ACQUISITION");
    }

    obj.put_str(STUDY_DATE, VR::DA, &da(&exposure.acquired_at));
    obj.put_str(STUDY_TIME, VR::TM, &tm(&exposure.acquired_at));
    obj.put(DataElement::new(
        SERIES_NUMBER,
        VR::IS,
        PrimitiveValue::from(exposure.series_number.to_string()),
    ));
    obj.put(DataElement::new(
        INSTANCE_NUMBER,
        VR::IS,
        PrimitiveValue::from(exposure.instance_number.to_string()),
    ));
    obj.put_str(BODY_PART_EXAMINED, VR::CS, &exposure.body_part);
    obj.put_str(VIEW_POSITION, VR::CS, &exposure.view_position);
    obj.put_str(OPERATORS_NAME, VR::PN, &exposure.operator_id);

    obj.put(DataElement::new(
        KVP,
        VR::DS,
        PrimitiveValue::from(exposure.kvp.to_string()),
    ));
    obj.put(DataElement::new(
        X_RAY_TUBE_CURRENT,
        VR::IS,
        PrimitiveValue::from((exposure.ma.round() as i64).to_string()),
    ));
    obj.put(DataElement::new(
        dicom_dictionary_std::tags::EXPOSURE_TIME,
        VR::IS,
        PrimitiveValue::from((exposure.exposure_time_ms.round() as i64).to_string()),
    ));
    obj.put(DataElement::new(
        IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT,
        VR::DS,
        PrimitiveValue::from(cgy_cm2_to_dgy_cm2(exposure.dap_cgy_cm2).to_string()),
    ));

    obj.put_str(MANUFACTURER, VR::LO, &device.manufacturer);
    obj.put_str(MANUFACTURER_MODEL_NAME, VR::LO, &device.model);
    obj.put_str(DEVICE_SERIAL_NUMBER, VR::LO, &device.serial);
    obj.put_str(STATION_NAME, VR::SH, &device.station_name);

    obj.put(DataElement::new(
        SAMPLES_PER_PIXEL,
        VR::US,
        PrimitiveValue::from(1u16),
    ));
    obj.put_str(PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
    obj.put(DataElement::new(
        ROWS,
        VR::US,
        PrimitiveValue::from(pixel.rows),
    ));
    obj.put(DataElement::new(
        COLUMNS,
        VR::US,
        PrimitiveValue::from(pixel.columns),
    ));
    obj.put(DataElement::new(
        BITS_ALLOCATED,
        VR::US,
        PrimitiveValue::from(pixel.bits_allocated),
    ));
    obj.put(DataElement::new(
        BITS_STORED,
        VR::US,
        PrimitiveValue::from(pixel.bits_stored),
    ));
    obj.put(DataElement::new(
        HIGH_BIT,
        VR::US,
        PrimitiveValue::from(pixel.high_bit),
    ));
    obj.put(DataElement::new(
        PIXEL_REPRESENTATION,
        VR::US,
        PrimitiveValue::from(0u16),
    ));
    obj.put(DataElement::new(
        PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U8(SmallVec::from_vec(pixel.pixel_data.clone())),
    ));

    verify_mandatory(&obj, MANDATORY)?;
    Ok(obj)
}

/// Attributes that must be present and non-empty in every produced image.
pub const MANDATORY: &[(dicom_core::Tag, &str)] = &[
    (SOP_CLASS_UID, "SOPClassUID"),
    (SOP_INSTANCE_UID, "SOPInstanceUID"),
    (STUDY_INSTANCE_UID, "StudyInstanceUID"),
    (SERIES_INSTANCE_UID, "SeriesInstanceUID"),
    (MODALITY, "Modality"),
    (PATIENT_NAME, "PatientName"),
    (PATIENT_ID, "PatientID"),
    (ACCESSION_NUMBER, "AccessionNumber"),
    (STUDY_DATE, "StudyDate"),
    (STUDY_TIME, "StudyTime"),
    (BODY_PART_EXAMINED, "BodyPartExamined"),
    (VIEW_POSITION, "ViewPosition"),
    (KVP, "KVP"),
    (IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT, "ImageAndFluoroscopyAreaDoseProduct"),
    (ROWS, "Rows"),
    (COLUMNS, "Columns"),
];

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::element_str;
    use chrono::Utc;

    pub(crate) fn study() -> StudyIdentity {
        StudyIdentity {
            study_uid: "1.2.3.100".to_string(),
            accession_number: "ACC-1001".to_string(),
            patient_name: "Doe^Jane".to_string(),
            patient_id: "PAT-7".to_string(),
            patient_birth_date: Some("19701224".to_string()),
            patient_sex: Some("F".to_string()),
            unscheduled: false,
            requested_procedure_id: Some("RP-1".to_string()),
            scheduled_step_id: Some("SPS-1".to_string()),
        }
    }

    pub(crate) fn device() -> DeviceIdentity {
        DeviceIdentity {
            manufacturer: "Hanbit".to_string(),
            model: "HXR-40".to_string(),
            serial: "4711".to_string(),
            station_name: "XR-ROOM-2".to_string(),
            station_aet: "XRC1".to_string(),
            software_version: "0.1.0".to_string(),
        }
    }

    pub(crate) fn exposure() -> ExposureInfo {
        ExposureInfo {
            sop_instance_uid: "1.2.3.100.1".to_string(),
            series_uid: "1.2.3.100.10".to_string(),
            series_number: 1,
            instance_number: 1,
            body_part: "CHEST".to_string(),
            view_position: "PA".to_string(),
            kvp: 125.0,
            ma: 320.0,
            exposure_time_ms: 8.0,
            dap_cgy_cm2: 12.5,
            operator_id: "op-17".to_string(),
            acquired_at: Utc::now(),
            rejected: false,
            rejection_reason: None,
        }
    }

    #[test]
    fn image_carries_identity_and_technique() {
        let obj = build_image(
            ImageKind::Dx,
            &study(),
            &device(),
            &exposure(),
            &PixelDescription::test_pattern(16, 16),
        )
        .unwrap();
        assert_eq!(element_str(&obj, MODALITY).unwrap(), "DX");
        assert_eq!(element_str(&obj, PATIENT_ID).unwrap(), "PAT-7");
        assert_eq!(element_str(&obj, KVP).unwrap(), "125");
        // 12.5 cGy·cm² goes out as 1.25 dGy·cm².
        assert_eq!(
            element_str(&obj, IMAGE_AND_FLUOROSCOPY_AREA_DOSE_PRODUCT).unwrap(),
            "1.25"
        );
    }

    #[test]
    fn cr_uses_the_cr_sop_class() {
        let obj = build_image(
            ImageKind::Cr,
            &study(),
            &device(),
            &exposure(),
            &PixelDescription::test_pattern(16, 16),
        )
        .unwrap();
        assert_eq!(
            element_str(&obj, SOP_CLASS_UID).unwrap(),
            sop_class::CR_IMAGE_STORAGE
        );
        assert_eq!(element_str(&obj, MODALITY).unwrap(), "CR");
    }

    #[test]
    fn empty_patient_name_fails_loudly() {
        let mut incomplete = study();
        incomplete.patient_name = String::new();
        let result = build_image(
            ImageKind::Dx,
            &incomplete,
            &device(),
            &exposure(),
            &PixelDescription::test_pattern(16, 16),
        );
        assert!(matches!(result, Err(Error::MissingAttribute("PatientName"))));
    }

    #[test]
    fn missing_pixels_fail_loudly() {
        let mut pixel = PixelDescription::test_pattern(16, 16);
        pixel.pixel_data.clear();
        let result = build_image(ImageKind::Dx, &study(), &device(), &exposure(), &pixel);
        assert!(matches!(result, Err(Error::MissingAttribute("PixelData"))));
    }

    #[test]
    fn unscheduled_studies_are_marked() {
        let mut emergency = study();
        emergency.unscheduled = true;
        let obj = build_image(
            ImageKind::Dx,
            &emergency,
            &device(),
            &exposure(),
            &PixelDescription::test_pattern(16, 16),
        )
        .unwrap();
        assert!(element_str(&obj, STUDY_DESCRIPTION)
            .unwrap()
            .contains("UNSCHEDULED"));
    }

    #[test]
    fn written_image_reparses_with_identical_mandatory_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let obj = build_image(
            ImageKind::Dx,
            &study(),
            &device(),
            &exposure(),
            &PixelDescription::test_pattern(16, 16),
        )
        .unwrap();
        let path = dir.path().join("dx.dcm");
        crate::common::write_dataset_file(
            obj.clone(),
            sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            "1.2.3.100.1",
            &path,
        )
        .unwrap();
        let back = crate::common::read_dataset_file(&path).unwrap();
        for (tag, name) in MANDATORY {
            assert_eq!(
                element_str(&obj, *tag).unwrap(),
                element_str(&back, *tag).unwrap(),
                "attribute {name} changed in the round trip"
            );
        }
    }
}
