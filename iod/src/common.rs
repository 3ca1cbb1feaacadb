use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, Tag, VR};
use dicom_dictionary_std::tags::{CODE_MEANING, CODE_VALUE, CODING_SCHEME_DESIGNATOR};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use std::path::Path;

/// DICOM DA format for a UTC timestamp.
pub(crate) fn da(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

/// DICOM TM format with millisecond fraction.
pub(crate) fn tm(at: &DateTime<Utc>) -> String {
    at.format("%H%M%S%.3f").to_string()
}

/// DAP unit conversion: the trackers account in cGy·cm², image objects
/// carry dGy·cm².
pub(crate) fn cgy_cm2_to_dgy_cm2(dap: f64) -> f64 {
    dap / 10.0
}

/// A coded entry (value, scheme, meaning).
pub(crate) fn code_item(value: &str, scheme: &str, meaning: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    item.put_str(CODE_VALUE, VR::SH, value);
    item.put_str(CODING_SCHEME_DESIGNATOR, VR::SH, scheme);
    item.put_str(CODE_MEANING, VR::LO, meaning);
    item
}

pub(crate) fn code_sequence(tag: Tag, item: InMemDicomObject) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(vec![item]))
}

/// Verifies that every listed attribute is present and non-empty.
///
/// Builders call this last; a dataset missing a mandatory attribute is
/// never returned.
pub(crate) fn verify_mandatory(
    obj: &InMemDicomObject,
    mandatory: &[(Tag, &'static str)],
) -> Result<()> {
    for (tag, name) in mandatory {
        let element = obj
            .element(*tag)
            .map_err(|_| Error::MissingAttribute(name))?;
        match element.vr() {
            VR::SQ => {
                if element.items().map(|i| i.is_empty()).unwrap_or(true) {
                    return Err(Error::MissingAttribute(name));
                }
            }
            _ => {
                let value = element.to_str().map_err(|_| Error::MissingAttribute(name))?;
                if value.trim_end_matches('\0').trim().is_empty() {
                    return Err(Error::MissingAttribute(name));
                }
            }
        }
    }
    Ok(())
}

/// Writes a dataset as a DICOM file (Explicit VR LE) under the spool.
pub fn write_dataset_file<P: AsRef<Path>>(
    obj: InMemDicomObject,
    sop_class_uid: &str,
    sop_instance_uid: &str,
    path: P,
) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_obj = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(xrc_dicom_net::negotiation::uids::EXPLICIT_VR_LE)
                .media_storage_sop_class_uid(sop_class_uid)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .map_err(|e| Error::Encode(e.to_string()))?;
    file_obj
        .write_to_file(path.as_ref())
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(())
}

/// Reads a spooled dataset back, without its file meta group.
pub fn read_dataset_file<P: AsRef<Path>>(path: P) -> Result<InMemDicomObject> {
    Ok(dicom_object::open_file(path.as_ref())
        .map_err(|e| Error::Encode(e.to_string()))?
        .into_inner())
}

/// String accessor used by the round-trip tests.
pub fn element_str(obj: &InMemDicomObject, tag: Tag) -> Result<String> {
    Ok(obj
        .element(tag)
        .map_err(|e| Error::Encode(e.to_string()))?
        .to_str()
        .map_err(|e| Error::Encode(e.to_string()))?
        .trim_end_matches('\0')
        .trim()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_dictionary_std::tags::{PATIENT_ID, PATIENT_NAME};

    #[test]
    fn dap_unit_conversion() {
        assert_eq!(cgy_cm2_to_dgy_cm2(25.0), 2.5);
        assert_eq!(cgy_cm2_to_dgy_cm2(0.0), 0.0);
    }

    #[test]
    fn mandatory_check_flags_missing_and_empty() {
        let mut obj = InMemDicomObject::new_empty();
        obj.put_str(PATIENT_ID, VR::LO, "PAT-1");
        assert!(verify_mandatory(&obj, &[(PATIENT_ID, "PatientID")]).is_ok());
        assert!(matches!(
            verify_mandatory(&obj, &[(PATIENT_NAME, "PatientName")]),
            Err(Error::MissingAttribute("PatientName"))
        ));
        obj.put_str(PATIENT_NAME, VR::PN, "");
        assert!(verify_mandatory(&obj, &[(PATIENT_NAME, "PatientName")]).is_err());
    }

    #[test]
    fn date_and_time_formats() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-03-14T09:26:53.589Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(da(&at), "20260314");
        assert_eq!(tm(&at), "092653.589");
    }
}
