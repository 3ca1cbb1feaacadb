use crate::{Error, Result};
use chrono::NaiveDate;
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, Tag, VR};
use dicom_object::InMemDicomObject;

const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
const MODALITY: Tag = Tag(0x0008, 0x0060);
const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const REQUESTED_PROCEDURE_DESCRIPTION: Tag = Tag(0x0032, 0x1060);
const SCHEDULED_STATION_AE_TITLE: Tag = Tag(0x0040, 0x0001);
const SCHEDULED_PROCEDURE_STEP_START_DATE: Tag = Tag(0x0040, 0x0002);
const SCHEDULED_PROCEDURE_STEP_DESCRIPTION: Tag = Tag(0x0040, 0x0007);
const SCHEDULED_PROCEDURE_STEP_ID: Tag = Tag(0x0040, 0x0009);
const SCHEDULED_PROCEDURE_STEP_SEQUENCE: Tag = Tag(0x0040, 0x0100);
const REQUESTED_PROCEDURE_ID: Tag = Tag(0x0040, 0x1001);

/// Filter for a modality worklist query.
#[derive(Debug, Clone, PartialEq)]
pub struct WorklistQuery {
    /// Our station AE title; scheduled steps are matched against it
    pub station_aet: String,
    pub modality: String,
    pub date: NaiveDate,
}

/// One scheduled procedure as returned by the worklist SCP.
///
/// Carries PHI by necessity; instances of this type must never be logged or
/// embedded in events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorklistEntry {
    pub patient_name: String,
    pub patient_id: String,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
    pub accession_number: String,
    pub study_instance_uid: String,
    pub requested_procedure_id: String,
    pub scheduled_step_id: String,
    pub scheduled_description: String,
}

/// C-FIND identifier for the query.
///
/// Empty values are universal matches; the scheduled procedure step item
/// constrains station, modality and date.
pub fn build_query(query: &WorklistQuery) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    obj.put_str(PATIENT_NAME, VR::PN, "");
    obj.put_str(PATIENT_ID, VR::LO, "");
    obj.put_str(PATIENT_BIRTH_DATE, VR::DA, "");
    obj.put_str(PATIENT_SEX, VR::CS, "");
    obj.put_str(ACCESSION_NUMBER, VR::SH, "");
    obj.put_str(STUDY_INSTANCE_UID, VR::UI, "");
    obj.put_str(REQUESTED_PROCEDURE_ID, VR::SH, "");
    obj.put_str(REQUESTED_PROCEDURE_DESCRIPTION, VR::LO, "");

    let mut step = InMemDicomObject::new_empty();
    step.put_str(SCHEDULED_STATION_AE_TITLE, VR::AE, &query.station_aet);
    step.put_str(MODALITY, VR::CS, &query.modality);
    step.put_str(
        SCHEDULED_PROCEDURE_STEP_START_DATE,
        VR::DA,
        &query.date.format("%Y%m%d").to_string(),
    );
    step.put_str(SCHEDULED_PROCEDURE_STEP_ID, VR::SH, "");
    step.put_str(SCHEDULED_PROCEDURE_STEP_DESCRIPTION, VR::LO, "");
    obj.put(DataElement::new(
        SCHEDULED_PROCEDURE_STEP_SEQUENCE,
        VR::SQ,
        DataSetSequence::from(vec![step]),
    ));
    obj
}

/// Maps one C-FIND response identifier to a worklist entry.
///
/// Patient id, accession and study UID are required; a response without
/// them cannot seed a study.
pub fn parse_entry(obj: &InMemDicomObject) -> Result<WorklistEntry> {
    let step = obj
        .element(SCHEDULED_PROCEDURE_STEP_SEQUENCE)
        .ok()
        .and_then(|e| e.items().and_then(|items| items.first().cloned()));
    Ok(WorklistEntry {
        patient_name: required(obj, PATIENT_NAME, "PatientName")?,
        patient_id: required(obj, PATIENT_ID, "PatientID")?,
        patient_birth_date: optional(obj, PATIENT_BIRTH_DATE),
        patient_sex: optional(obj, PATIENT_SEX),
        accession_number: required(obj, ACCESSION_NUMBER, "AccessionNumber")?,
        study_instance_uid: required(obj, STUDY_INSTANCE_UID, "StudyInstanceUID")?,
        requested_procedure_id: optional(obj, REQUESTED_PROCEDURE_ID).unwrap_or_default(),
        scheduled_step_id: step
            .as_ref()
            .and_then(|s| optional(s, SCHEDULED_PROCEDURE_STEP_ID))
            .unwrap_or_default(),
        scheduled_description: step
            .as_ref()
            .and_then(|s| optional(s, SCHEDULED_PROCEDURE_STEP_DESCRIPTION))
            .unwrap_or_default(),
    })
}

fn required(obj: &InMemDicomObject, tag: Tag, name: &str) -> Result<String> {
    let value = optional(obj, tag)
        .ok_or_else(|| Error::MissingAttribute(name.to_string()))?;
    if value.is_empty() {
        return Err(Error::MissingAttribute(name.to_string()));
    }
    Ok(value)
}

fn optional(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches('\0').trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_constrains_station_modality_and_date() {
        let query = build_query(&WorklistQuery {
            station_aet: "XRC1".to_string(),
            modality: "DX".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        });
        let step = query
            .element(SCHEDULED_PROCEDURE_STEP_SEQUENCE)
            .unwrap()
            .items()
            .unwrap()[0]
            .clone();
        assert_eq!(
            step.element(MODALITY).unwrap().to_str().unwrap().trim(),
            "DX"
        );
        assert_eq!(
            step.element(SCHEDULED_PROCEDURE_STEP_START_DATE)
                .unwrap()
                .to_str()
                .unwrap()
                .trim(),
            "20260314"
        );
    }

    fn response(patient_id: &str) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        obj.put_str(PATIENT_NAME, VR::PN, "Doe^Jane");
        obj.put_str(PATIENT_ID, VR::LO, patient_id);
        obj.put_str(ACCESSION_NUMBER, VR::SH, "ACC-1001");
        obj.put_str(STUDY_INSTANCE_UID, VR::UI, "1.2.3.9");
        let mut step = InMemDicomObject::new_empty();
        step.put_str(SCHEDULED_PROCEDURE_STEP_ID, VR::SH, "SPS-1");
        step.put_str(SCHEDULED_PROCEDURE_STEP_DESCRIPTION, VR::LO, "Chest PA");
        obj.put(DataElement::new(
            SCHEDULED_PROCEDURE_STEP_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![step]),
        ));
        obj
    }

    #[test]
    fn parse_maps_identifier_fields() {
        let entry = parse_entry(&response("PAT-7")).unwrap();
        assert_eq!(entry.patient_id, "PAT-7");
        assert_eq!(entry.accession_number, "ACC-1001");
        assert_eq!(entry.study_instance_uid, "1.2.3.9");
        assert_eq!(entry.scheduled_step_id, "SPS-1");
        assert_eq!(entry.scheduled_description, "Chest PA");
    }

    #[test]
    fn missing_patient_id_is_rejected() {
        let mut obj = response("PAT-7");
        obj.put_str(PATIENT_ID, VR::LO, "");
        assert!(matches!(
            parse_entry(&obj),
            Err(Error::MissingAttribute(_))
        ));
    }
}
