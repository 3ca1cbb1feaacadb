//! Scripted link implementations for the crate's own tests.

use crate::commands::{COMMAND_FIELD, COMMAND_DATA_SET_TYPE, NO_DATA_SET, STATUS};
use crate::link::{AcceptedContext, DimseLink, DimseMessage, LinkFactory};
use crate::negotiation::uids::EXPLICIT_VR_LE;
use crate::tls::TlsParams;
use crate::{Error, Result};
use async_trait::async_trait;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_object::InMemDicomObject;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use xrc_config::Destination;

/// Record of everything a test link was asked to send.
#[derive(Debug)]
pub(crate) enum SentRecord {
    Command {
        pc_id: u8,
        command: InMemDicomObject,
    },
    Data {
        pc_id: u8,
        bytes: usize,
    },
}

pub(crate) struct MockLink {
    contexts: Vec<AcceptedContext>,
    responses: Mutex<VecDeque<DimseMessage>>,
    sent: Arc<Mutex<Vec<SentRecord>>>,
}

impl MockLink {
    pub(crate) fn new(
        contexts: Vec<AcceptedContext>,
        responses: Vec<DimseMessage>,
        sent: Arc<Mutex<Vec<SentRecord>>>,
    ) -> Self {
        Self {
            contexts,
            responses: Mutex::new(responses.into()),
            sent,
        }
    }
}

#[async_trait]
impl DimseLink for MockLink {
    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.contexts
    }

    async fn send_command(&mut self, pc_id: u8, command: &InMemDicomObject) -> Result<()> {
        self.sent.lock().unwrap().push(SentRecord::Command {
            pc_id,
            command: command.clone(),
        });
        Ok(())
    }

    async fn send_data(&mut self, pc_id: u8, data: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(SentRecord::Data {
            pc_id,
            bytes: data.len(),
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<DimseMessage> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Io("mock link has no scripted response left".to_string()))
    }

    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Factory producing scripted links.
///
/// Every `connect` call pops the next script; with no scripts queued the
/// link answers nothing and any receive fails.
pub(crate) struct MockFactory {
    scripts: Mutex<VecDeque<Vec<DimseMessage>>>,
    transfer_syntax: String,
    pub(crate) sent: Arc<Mutex<Vec<SentRecord>>>,
    pub(crate) connects: Mutex<usize>,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            transfer_syntax: EXPLICIT_VR_LE.to_string(),
            sent: Arc::new(Mutex::new(vec![])),
            connects: Mutex::new(0),
        }
    }
}

impl MockFactory {
    pub(crate) fn with_transfer_syntax(mut self, transfer_syntax: &str) -> Self {
        self.transfer_syntax = transfer_syntax.to_string();
        self
    }

    pub(crate) fn push_script(&self, responses: Vec<DimseMessage>) {
        self.scripts.lock().unwrap().push_back(responses);
    }
}

#[async_trait]
impl LinkFactory for MockFactory {
    async fn connect(
        &self,
        _destination: &Destination,
        _tls: Option<&TlsParams>,
        abstract_syntaxes: &[String],
    ) -> Result<Box<dyn DimseLink>> {
        *self.connects.lock().unwrap() += 1;
        let contexts = abstract_syntaxes
            .iter()
            .enumerate()
            .map(|(i, syntax)| AcceptedContext {
                id: (i * 2 + 1) as u8,
                abstract_syntax: syntax.clone(),
                transfer_syntax: self.transfer_syntax.clone(),
            })
            .collect();
        let responses = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(MockLink::new(
            contexts,
            responses,
            Arc::clone(&self.sent),
        )))
    }
}

/// A response message with the given command field and status.
pub(crate) fn rsp(field: u16, status: u16) -> DimseMessage {
    let mut command = InMemDicomObject::new_empty();
    command.put(DataElement::new(
        COMMAND_FIELD,
        VR::US,
        PrimitiveValue::from(field),
    ));
    command.put(DataElement::new(
        STATUS,
        VR::US,
        PrimitiveValue::from(status),
    ));
    command.put(DataElement::new(
        COMMAND_DATA_SET_TYPE,
        VR::US,
        PrimitiveValue::from(NO_DATA_SET),
    ));
    DimseMessage {
        pc_id: 1,
        command,
        data: None,
    }
}

/// A response message carrying a dataset.
pub(crate) fn rsp_with_data(field: u16, status: u16, data: Vec<u8>) -> DimseMessage {
    let mut message = rsp(field, status);
    message
        .command
        .put(DataElement::new(
            COMMAND_DATA_SET_TYPE,
            VR::US,
            PrimitiveValue::from(crate::commands::DATA_SET_PRESENT),
        ));
    message.data = Some(data);
    message
}
