//! DIMSE command set construction and encoding.
//!
//! Command sets always travel as Implicit VR Little Endian regardless of the
//! negotiated data transfer syntax. The command group length element is
//! computed here at encode time.

use crate::{Error, Result};
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;

pub const COMMAND_GROUP_LENGTH: Tag = Tag(0x0000, 0x0000);
pub const AFFECTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0002);
pub const REQUESTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0003);
pub const COMMAND_FIELD: Tag = Tag(0x0000, 0x0100);
pub const MESSAGE_ID: Tag = Tag(0x0000, 0x0110);
pub const MESSAGE_ID_BEING_RESPONDED_TO: Tag = Tag(0x0000, 0x0120);
pub const PRIORITY: Tag = Tag(0x0000, 0x0700);
pub const COMMAND_DATA_SET_TYPE: Tag = Tag(0x0000, 0x0800);
pub const STATUS: Tag = Tag(0x0000, 0x0900);
pub const AFFECTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1000);
pub const REQUESTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1001);
pub const EVENT_TYPE_ID: Tag = Tag(0x0000, 0x1002);
pub const ACTION_TYPE_ID: Tag = Tag(0x0000, 0x1008);

/// Command field values for the operations the console initiates or
/// receives.
pub mod command_field {
    pub const C_STORE_RQ: u16 = 0x0001;
    pub const C_STORE_RSP: u16 = 0x8001;
    pub const C_FIND_RQ: u16 = 0x0020;
    pub const C_FIND_RSP: u16 = 0x8020;
    pub const C_ECHO_RQ: u16 = 0x0030;
    pub const C_ECHO_RSP: u16 = 0x8030;
    pub const N_EVENT_REPORT_RQ: u16 = 0x0100;
    pub const N_EVENT_REPORT_RSP: u16 = 0x8100;
    pub const N_SET_RQ: u16 = 0x0120;
    pub const N_SET_RSP: u16 = 0x8120;
    pub const N_ACTION_RQ: u16 = 0x0130;
    pub const N_ACTION_RSP: u16 = 0x8130;
    pub const N_CREATE_RQ: u16 = 0x0140;
    pub const N_CREATE_RSP: u16 = 0x8140;
}

/// CommandDataSetType value meaning no dataset follows.
pub const NO_DATA_SET: u16 = 0x0101;
/// CommandDataSetType value used when a dataset follows.
pub const DATA_SET_PRESENT: u16 = 0x0000;

fn base(field: u16, msg_id: u16, data_set_type: u16) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        COMMAND_FIELD,
        VR::US,
        PrimitiveValue::from(field),
    ));
    obj.put(DataElement::new(
        MESSAGE_ID,
        VR::US,
        PrimitiveValue::from(msg_id),
    ));
    obj.put(DataElement::new(
        COMMAND_DATA_SET_TYPE,
        VR::US,
        PrimitiveValue::from(data_set_type),
    ));
    obj
}

pub fn c_echo_rq(msg_id: u16, sop_class: &str) -> InMemDicomObject {
    let mut obj = base(command_field::C_ECHO_RQ, msg_id, NO_DATA_SET);
    obj.put(DataElement::new(
        AFFECTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj
}

pub fn c_store_rq(msg_id: u16, sop_class: &str, sop_instance: &str) -> InMemDicomObject {
    let mut obj = base(command_field::C_STORE_RQ, msg_id, DATA_SET_PRESENT);
    obj.put(DataElement::new(
        AFFECTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        AFFECTED_SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance),
    ));
    obj.put(DataElement::new(
        PRIORITY,
        VR::US,
        PrimitiveValue::from(0u16),
    ));
    obj
}

pub fn c_find_rq(msg_id: u16, sop_class: &str) -> InMemDicomObject {
    let mut obj = base(command_field::C_FIND_RQ, msg_id, DATA_SET_PRESENT);
    obj.put(DataElement::new(
        AFFECTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        PRIORITY,
        VR::US,
        PrimitiveValue::from(0u16),
    ));
    obj
}

pub fn n_create_rq(msg_id: u16, sop_class: &str, sop_instance: &str) -> InMemDicomObject {
    let mut obj = base(command_field::N_CREATE_RQ, msg_id, DATA_SET_PRESENT);
    obj.put(DataElement::new(
        AFFECTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        AFFECTED_SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance),
    ));
    obj
}

pub fn n_set_rq(msg_id: u16, sop_class: &str, sop_instance: &str) -> InMemDicomObject {
    let mut obj = base(command_field::N_SET_RQ, msg_id, DATA_SET_PRESENT);
    obj.put(DataElement::new(
        REQUESTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        REQUESTED_SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance),
    ));
    obj
}

pub fn n_action_rq(
    msg_id: u16,
    sop_class: &str,
    sop_instance: &str,
    action_type_id: u16,
) -> InMemDicomObject {
    let mut obj = base(command_field::N_ACTION_RQ, msg_id, DATA_SET_PRESENT);
    obj.put(DataElement::new(
        REQUESTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        REQUESTED_SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance),
    ));
    obj.put(DataElement::new(
        ACTION_TYPE_ID,
        VR::US,
        PrimitiveValue::from(action_type_id),
    ));
    obj
}

/// Response to an incoming N-EVENT-REPORT (storage commitment results).
pub fn n_event_report_rsp(
    msg_id_responded_to: u16,
    sop_class: &str,
    sop_instance: &str,
    event_type_id: u16,
) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty();
    obj.put(DataElement::new(
        COMMAND_FIELD,
        VR::US,
        PrimitiveValue::from(command_field::N_EVENT_REPORT_RSP),
    ));
    obj.put(DataElement::new(
        MESSAGE_ID_BEING_RESPONDED_TO,
        VR::US,
        PrimitiveValue::from(msg_id_responded_to),
    ));
    obj.put(DataElement::new(
        COMMAND_DATA_SET_TYPE,
        VR::US,
        PrimitiveValue::from(NO_DATA_SET),
    ));
    obj.put(DataElement::new(
        STATUS,
        VR::US,
        PrimitiveValue::from(0u16),
    ));
    obj.put(DataElement::new(
        AFFECTED_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        AFFECTED_SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(sop_instance),
    ));
    obj.put(DataElement::new(
        EVENT_TYPE_ID,
        VR::US,
        PrimitiveValue::from(event_type_id),
    ));
    obj
}

pub fn status_of(rsp: &InMemDicomObject) -> Result<u16> {
    Ok(rsp
        .element(STATUS)
        .map_err(|e| Error::Encode(e.to_string()))?
        .to_int()
        .map_err(|e| Error::Encode(e.to_string()))?)
}

pub fn command_field_of(cmd: &InMemDicomObject) -> Result<u16> {
    Ok(cmd
        .element(COMMAND_FIELD)
        .map_err(|e| Error::Encode(e.to_string()))?
        .to_int()
        .map_err(|e| Error::Encode(e.to_string()))?)
}

/// Whether the command announces a following data set.
pub fn has_data_set(cmd: &InMemDicomObject) -> bool {
    cmd.element(COMMAND_DATA_SET_TYPE)
        .ok()
        .and_then(|e| e.to_int::<u16>().ok())
        .map(|v| v != NO_DATA_SET)
        .unwrap_or(false)
}

/// Encodes a command set as Implicit VR Little Endian with a computed
/// command group length.
pub fn encode_command(cmd: &InMemDicomObject) -> Result<Vec<u8>> {
    let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut body = Vec::new();
    cmd.write_dataset_with_ts(&mut body, &ts)
        .map_err(|e| Error::Encode(e.to_string()))?;
    let mut full = cmd.clone();
    full.put(DataElement::new(
        COMMAND_GROUP_LENGTH,
        VR::UL,
        PrimitiveValue::from(body.len() as u32),
    ));
    let mut out = Vec::new();
    full.write_dataset_with_ts(&mut out, &ts)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(out)
}

/// Decodes a received command set.
pub fn decode_command(bytes: &[u8]) -> Result<InMemDicomObject> {
    let ts = IMPLICIT_VR_LITTLE_ENDIAN.erased();
    InMemDicomObject::read_dataset_with_ts(bytes, &ts)
        .map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_request_round_trips() {
        let cmd = c_store_rq(7, "1.2.840.10008.5.1.4.1.1.1.1", "1.2.3.4");
        let bytes = encode_command(&cmd).unwrap();
        let decoded = decode_command(&bytes).unwrap();
        assert_eq!(
            command_field_of(&decoded).unwrap(),
            command_field::C_STORE_RQ
        );
        assert!(has_data_set(&decoded));
        let sop: String = decoded
            .element(AFFECTED_SOP_INSTANCE_UID)
            .unwrap()
            .to_str()
            .unwrap()
            .trim_end_matches('\0')
            .to_string();
        assert_eq!(sop, "1.2.3.4");
    }

    #[test]
    fn group_length_matches_the_remaining_bytes() {
        let cmd = c_echo_rq(1, "1.2.840.10008.1.1");
        let bytes = encode_command(&cmd).unwrap();
        // Implicit VR: tag (4) + length (4) + UL value (4).
        let value = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(value as usize, bytes.len() - 12);
    }

    #[test]
    fn echo_has_no_data_set() {
        let cmd = c_echo_rq(1, "1.2.840.10008.1.1");
        assert!(!has_data_set(&cmd));
    }

    #[test]
    fn status_is_read_from_responses() {
        let mut rsp = InMemDicomObject::new_empty();
        rsp.put(DataElement::new(
            STATUS,
            VR::US,
            PrimitiveValue::from(0xA700u16),
        ));
        assert_eq!(status_of(&rsp).unwrap(), 0xA700);
    }

    #[test]
    fn action_request_carries_the_action_type() {
        let cmd = n_action_rq(3, "1.2.840.10008.1.20.1", "1.2.840.10008.1.20.1.1", 1);
        let action: u16 = cmd.element(ACTION_TYPE_ID).unwrap().to_int().unwrap();
        assert_eq!(action, 1);
    }
}
