use crate::commands::{self, command_field};
use crate::commitment::CommitmentTracker;
use crate::link::{DimseMessage, LinkFactory};
use crate::negotiation::{PROPOSED_TRANSFER_SYNTAXES, select_for_dataset};
use crate::pool::{AssociationPool, PooledAssociation};
use crate::status::{StatusClass, classify_status};
use crate::tls::TlsPolicy;
use crate::worklist::{WorklistEntry, WorklistQuery, build_query, parse_entry};
use crate::{Error, Result};
use async_trait::async_trait;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_encoding::TransferSyntaxIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use xrc_config::{Destination, PoolSettings};
use xrc_event_bus::EventBus;
use xrc_retry_queue::{AttemptOutcome, DicomTransmission, OperationKind, TransmissionSender};

/// SOP classes the console negotiates on every association.
pub mod sop_class {
    pub const VERIFICATION: &str = "1.2.840.10008.1.1";
    pub const DX_IMAGE_STORAGE_FOR_PRESENTATION: &str = "1.2.840.10008.5.1.4.1.1.1.1";
    pub const CR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
    pub const XRAY_RADIATION_DOSE_SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.67";
    pub const GRAYSCALE_SOFTCOPY_PRESENTATION_STATE: &str = "1.2.840.10008.5.1.4.1.1.11.1";
    pub const MODALITY_PERFORMED_PROCEDURE_STEP: &str = "1.2.840.10008.3.1.2.3.3";
    pub const STORAGE_COMMITMENT_PUSH_MODEL: &str = "1.2.840.10008.1.20.1";
    pub const MODALITY_WORKLIST_FIND: &str = "1.2.840.10008.5.1.4.31";
}

fn proposed_abstract_syntaxes() -> Vec<String> {
    vec![
        sop_class::VERIFICATION.to_string(),
        sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(),
        sop_class::CR_IMAGE_STORAGE.to_string(),
        sop_class::XRAY_RADIATION_DOSE_SR_STORAGE.to_string(),
        sop_class::GRAYSCALE_SOFTCOPY_PRESENTATION_STATE.to_string(),
        sop_class::MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
        sop_class::STORAGE_COMMITMENT_PUSH_MODEL.to_string(),
        sop_class::MODALITY_WORKLIST_FIND.to_string(),
    ]
}

/// SCU side of the console's DICOM traffic.
///
/// Pools associations per destination, negotiates transfer syntaxes, maps
/// DIMSE statuses into retry-queue outcomes and routes incoming storage
/// commitment reports to the tracker. It never accepts associations.
pub struct DicomTransport {
    factory: Arc<dyn LinkFactory>,
    tls_policy: TlsPolicy,
    pool_settings: PoolSettings,
    pools: Mutex<HashMap<String, Arc<AssociationPool>>>,
    commitment: Arc<CommitmentTracker>,
    message_id: AtomicU16,
}

impl DicomTransport {
    pub fn new(
        factory: Arc<dyn LinkFactory>,
        tls_settings: xrc_config::TlsSettings,
        pool_settings: PoolSettings,
        bus: Arc<EventBus>,
        commitment: Arc<CommitmentTracker>,
    ) -> Self {
        Self {
            factory,
            tls_policy: TlsPolicy::new(tls_settings, bus),
            pool_settings,
            pools: Mutex::new(HashMap::new()),
            commitment,
            message_id: AtomicU16::new(1),
        }
    }

    pub fn commitment(&self) -> &Arc<CommitmentTracker> {
        &self.commitment
    }

    fn next_message_id(&self) -> u16 {
        // Wraps within the u16 space DIMSE allows; zero is skipped.
        let id = self.message_id.fetch_add(1, Ordering::SeqCst);
        if id == 0 { self.next_message_id() } else { id }
    }

    fn pool_for(&self, destination: &Destination) -> Result<Arc<AssociationPool>> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(pool) = pools.get(&destination.name) {
            return Ok(Arc::clone(pool));
        }
        let tls = self.tls_policy.params_for(destination)?;
        let pool = Arc::new(AssociationPool::new(
            destination.clone(),
            tls,
            Arc::clone(&self.factory),
            self.pool_settings.clone(),
            proposed_abstract_syntaxes(),
        ));
        pools.insert(destination.name.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    /// C-ECHO round trip, used before first use of a destination and on
    /// operator demand.
    pub async fn verify(&self, destination: &Destination) -> Result<()> {
        let pool = self.pool_for(destination)?;
        let mut assoc = pool.acquire().await?;
        let context = find_context(&mut assoc, sop_class::VERIFICATION)?;
        let cmd = commands::c_echo_rq(self.next_message_id(), sop_class::VERIFICATION);
        assoc.link().send_command(context.0, &cmd).await?;
        let status = self.receive_response(&mut assoc).await?;
        if status != 0x0000 {
            return Err(Error::Dimse { status });
        }
        info!("C-ECHO to {} verified", destination.name);
        Ok(())
    }

    /// Runs a modality worklist query, collecting every identifier.
    pub async fn query_worklist(
        &self,
        destination: &Destination,
        query: &WorklistQuery,
    ) -> Result<Vec<WorklistEntry>> {
        let pool = self.pool_for(destination)?;
        let mut assoc = pool.acquire().await?;
        let (pc_id, transfer_syntax) = find_context(&mut assoc, sop_class::MODALITY_WORKLIST_FIND)?;
        let identifier = build_query(query);
        let cmd = commands::c_find_rq(self.next_message_id(), sop_class::MODALITY_WORKLIST_FIND);
        assoc.link().send_command(pc_id, &cmd).await?;
        let bytes = encode_dataset(&identifier, &transfer_syntax)?;
        assoc.link().send_data(pc_id, &bytes).await?;
        let mut entries = vec![];
        loop {
            let message = assoc.link().receive().await?;
            let status = commands::status_of(&message.command)?;
            match classify_status(status) {
                StatusClass::Pending => {
                    let Some(data) = message.data else {
                        continue;
                    };
                    let obj = decode_dataset(&data, &transfer_syntax)?;
                    match parse_entry(&obj) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => warn!("Skipping malformed worklist response: {}", e),
                    }
                }
                StatusClass::Success => break,
                _ => return Err(Error::Dimse { status }),
            }
        }
        debug!("Worklist query returned {} entries", entries.len());
        Ok(entries)
    }

    /// Sends one queued transmission and returns the DIMSE status.
    async fn execute(&self, item: &DicomTransmission) -> Result<u16> {
        let pool = self.pool_for(&item.destination)?;
        let mut assoc = pool.acquire().await?;
        let (pc_id, accepted_ts) = find_context(&mut assoc, &item.sop_class_uid)?;

        let file_obj = dicom_object::open_file(&item.dataset_ref)
            .map_err(|e| Error::Io(format!("cannot open dataset {}: {e}", item.dataset_ref.display())))?;
        let dataset_ts = file_obj.meta().transfer_syntax().trim_end_matches('\0').to_string();
        let negotiated = select_for_dataset(&dataset_ts, std::slice::from_ref(&accepted_ts))?;
        let dataset = file_obj.into_inner();
        let bytes = encode_dataset(&dataset, &negotiated.transfer_syntax)?;

        let msg_id = self.next_message_id();
        let cmd = match item.operation {
            OperationKind::CStore => {
                commands::c_store_rq(msg_id, &item.sop_class_uid, &item.sop_instance_uid)
            }
            OperationKind::NCreate => {
                commands::n_create_rq(msg_id, &item.sop_class_uid, &item.sop_instance_uid)
            }
            OperationKind::NSet => {
                commands::n_set_rq(msg_id, &item.sop_class_uid, &item.sop_instance_uid)
            }
            OperationKind::NAction => commands::n_action_rq(
                msg_id,
                &item.sop_class_uid,
                &item.sop_instance_uid,
                crate::commitment::COMMITMENT_REQUEST_ACTION_TYPE,
            ),
        };
        assoc.link().send_command(pc_id, &cmd).await?;
        assoc.link().send_data(pc_id, &bytes).await?;
        self.receive_response(&mut assoc).await
    }

    /// Waits for the response to the outstanding request, servicing any
    /// storage commitment report that arrives in between.
    async fn receive_response(&self, assoc: &mut PooledAssociation) -> Result<u16> {
        loop {
            let message = assoc.link().receive().await?;
            let field = commands::command_field_of(&message.command)?;
            if field == command_field::N_EVENT_REPORT_RQ {
                self.service_event_report(assoc, message).await?;
                continue;
            }
            return commands::status_of(&message.command);
        }
    }

    async fn service_event_report(
        &self,
        assoc: &mut PooledAssociation,
        message: DimseMessage,
    ) -> Result<()> {
        let Some(data) = message.data else {
            warn!("Storage commitment report without a dataset");
            return Ok(());
        };
        // Event information travels in the transfer syntax of its context.
        let transfer_syntax = assoc
            .link()
            .accepted_contexts()
            .iter()
            .find(|c| c.id == message.pc_id)
            .map(|c| c.transfer_syntax.clone())
            .unwrap_or_else(|| crate::negotiation::uids::IMPLICIT_VR_LE.to_string());
        let info = decode_dataset(&data, &transfer_syntax)?;
        if let Err(e) = self.commitment.handle_event_report(&info) {
            warn!("Commitment report not applied: {}", e);
        }
        let event_type: u16 = message
            .command
            .element(commands::EVENT_TYPE_ID)
            .ok()
            .and_then(|e| e.to_int().ok())
            .unwrap_or(1);
        let msg_id: u16 = message
            .command
            .element(commands::MESSAGE_ID)
            .ok()
            .and_then(|e| e.to_int().ok())
            .unwrap_or(0);
        let rsp = commands::n_event_report_rsp(
            msg_id,
            crate::commitment::STORAGE_COMMITMENT_PUSH_MODEL_SOP_CLASS,
            crate::commitment::STORAGE_COMMITMENT_WELL_KNOWN_INSTANCE,
            event_type,
        );
        assoc.link().send_command(message.pc_id, &rsp).await
    }
}

#[async_trait]
impl TransmissionSender for DicomTransport {
    async fn send(&self, item: &DicomTransmission) -> AttemptOutcome {
        match self.execute(item).await {
            Ok(status) => match classify_status(status) {
                StatusClass::Success => AttemptOutcome::Success,
                StatusClass::Warning => {
                    AttemptOutcome::SuccessWithWarning(format!("DIMSE status 0x{status:04X}"))
                }
                StatusClass::RetryableFailure => {
                    AttemptOutcome::Retryable(format!("DIMSE status 0x{status:04X}"))
                }
                StatusClass::TerminalFailure | StatusClass::Pending => {
                    AttemptOutcome::Terminal(format!("DIMSE status 0x{status:04X}"))
                }
            },
            Err(e) => outcome_for_error(e),
        }
    }
}

fn outcome_for_error(error: Error) -> AttemptOutcome {
    match error {
        Error::PoolExhausted(destination) => {
            AttemptOutcome::Retryable(format!("PoolExhausted({destination})"))
        }
        Error::Timeout(detail) => AttemptOutcome::Retryable(detail),
        Error::Io(detail) => AttemptOutcome::Retryable(detail),
        Error::AssociationRejected { reason, terminal } => {
            if terminal {
                AttemptOutcome::Terminal(format!("association rejected: {reason}"))
            } else {
                AttemptOutcome::Retryable(format!("association rejected: {reason}"))
            }
        }
        Error::TransferSyntaxConflict(detail) => {
            AttemptOutcome::Terminal(format!("TransferSyntaxConflict: {detail}"))
        }
        Error::Tls(detail) => AttemptOutcome::Terminal(format!("TLS failure: {detail}")),
        Error::Dimse { status } => AttemptOutcome::Terminal(format!("DIMSE status 0x{status:04X}")),
        Error::Encode(detail) | Error::MissingAttribute(detail) => {
            AttemptOutcome::Terminal(detail)
        }
        Error::UnknownTransaction(uid) => {
            AttemptOutcome::Terminal(format!("unknown commitment transaction {uid}"))
        }
    }
}

fn find_context(assoc: &mut PooledAssociation, abstract_syntax: &str) -> Result<(u8, String)> {
    assoc
        .link()
        .accepted_contexts()
        .iter()
        .find(|c| c.abstract_syntax == abstract_syntax)
        .map(|c| (c.id, c.transfer_syntax.clone()))
        .ok_or_else(|| Error::AssociationRejected {
            reason: format!("no accepted presentation context for {abstract_syntax}"),
            terminal: true,
        })
}

fn registry_ts(uid: &str) -> Result<&'static dicom_encoding::transfer_syntax::TransferSyntax> {
    TransferSyntaxRegistry
        .get(uid)
        .ok_or_else(|| Error::TransferSyntaxConflict(format!("unknown transfer syntax {uid}")))
}

fn encode_dataset(obj: &InMemDicomObject, transfer_syntax: &str) -> Result<Vec<u8>> {
    let ts = registry_ts(transfer_syntax)?;
    let mut out = Vec::new();
    obj.write_dataset_with_ts(&mut out, ts)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(out)
}

fn decode_dataset(bytes: &[u8], transfer_syntax: &str) -> Result<InMemDicomObject> {
    let ts = registry_ts(transfer_syntax)?;
    InMemDicomObject::read_dataset_with_ts(bytes, ts).map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFactory, SentRecord, rsp};
    use dicom_core::VR;
    use dicom_object::FileMetaTableBuilder;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use xrc_config::{RetrySettings, TlsSettings};
    use xrc_retry_queue::RetryQueue;

    fn destination() -> Destination {
        Destination {
            name: "pacs1".to_string(),
            aet: "PACS".to_string(),
            host: "10.0.0.5".to_string(),
            port: 11112,
            tls: false,
            mutual_tls: false,
            send_gsps: false,
        }
    }

    fn write_dx_file(dir: &Path, sop_instance: &str) -> PathBuf {
        let mut obj = InMemDicomObject::new_empty();
        obj.put_str(
            dicom_core::Tag(0x0008, 0x0016),
            VR::UI,
            sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
        );
        obj.put_str(dicom_core::Tag(0x0008, 0x0018), VR::UI, sop_instance);
        obj.put_str(dicom_core::Tag(0x0008, 0x0060), VR::CS, "DX");
        let path = dir.join(format!("{sop_instance}.dcm"));
        let file_obj = obj
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(crate::negotiation::uids::EXPLICIT_VR_LE)
                    .media_storage_sop_class_uid(sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION)
                    .media_storage_sop_instance_uid(sop_instance),
            )
            .unwrap();
        file_obj.write_to_file(&path).unwrap();
        path
    }

    fn transport_with(factory: Arc<MockFactory>, dir: &Path) -> (DicomTransport, Arc<RetryQueue>) {
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(
            RetryQueue::open(dir.join("spool"), RetrySettings::default(), bus.clone()).unwrap(),
        );
        let commitment = Arc::new(CommitmentTracker::new(
            bus.clone(),
            queue.clone(),
            Duration::from_secs(300),
        ));
        (
            DicomTransport::new(
                factory,
                TlsSettings::default(),
                PoolSettings::default(),
                bus,
                commitment,
            ),
            queue,
        )
    }

    fn transmission(dataset_ref: PathBuf) -> DicomTransmission {
        DicomTransmission {
            id: "tx-00000001".to_string(),
            operation: OperationKind::CStore,
            destination: destination(),
            dataset_ref,
            sop_class_uid: sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(),
            sop_instance_uid: "1.2.3.1".to_string(),
            correlation_id: "corr-1".to_string(),
            attempts: 1,
            last_attempt_at: None,
            next_retry_at: chrono::Utc::now(),
            status: xrc_retry_queue::TransmissionStatus::InFlight,
            last_error: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_store_maps_to_success() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        factory.push_script(vec![rsp(command_field::C_STORE_RSP, 0x0000)]);
        let (transport, _queue) = transport_with(factory.clone(), dir.path());
        let dataset = write_dx_file(dir.path(), "1.2.3.1");
        let outcome = transport.send(&transmission(dataset)).await;
        assert_eq!(outcome, AttemptOutcome::Success);
        let sent = factory.sent.lock().unwrap();
        assert!(matches!(sent[0], SentRecord::Command { .. }));
        assert!(matches!(sent[1], SentRecord::Data { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resource_failure_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        factory.push_script(vec![rsp(command_field::C_STORE_RSP, 0xA700)]);
        let (transport, _queue) = transport_with(factory.clone(), dir.path());
        let dataset = write_dx_file(dir.path(), "1.2.3.1");
        let outcome = transport.send(&transmission(dataset)).await;
        assert!(matches!(outcome, AttemptOutcome::Retryable(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dataset_rejection_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        factory.push_script(vec![rsp(command_field::C_STORE_RSP, 0xA900)]);
        let (transport, _queue) = transport_with(factory.clone(), dir.path());
        let dataset = write_dx_file(dir.path(), "1.2.3.1");
        let outcome = transport.send(&transmission(dataset)).await;
        assert!(matches!(outcome, AttemptOutcome::Terminal(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lossy_only_acceptance_fails_terminally() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(
            MockFactory::default()
                .with_transfer_syntax(crate::negotiation::uids::JPEG_BASELINE),
        );
        let (transport, _queue) = transport_with(factory, dir.path());
        let dataset = write_dx_file(dir.path(), "1.2.3.1");
        let outcome = transport.send(&transmission(dataset)).await;
        match outcome {
            AttemptOutcome::Terminal(reason) => {
                assert!(reason.contains("TransferSyntaxConflict"), "{reason}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tls_destination_without_provider_fails_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(
            RetryQueue::open(dir.path().join("spool"), RetrySettings::default(), bus.clone())
                .unwrap(),
        );
        let commitment = Arc::new(CommitmentTracker::new(
            bus.clone(),
            queue,
            Duration::from_secs(300),
        ));
        let transport = DicomTransport::new(
            factory.clone(),
            TlsSettings::default(),
            PoolSettings::default(),
            bus.clone(),
            commitment,
        );
        let mut sub = bus.subscribe();
        let mut dest = destination();
        dest.tls = true;
        let dataset = write_dx_file(dir.path(), "1.2.3.1");
        let mut item = transmission(dataset);
        item.destination = dest;
        let outcome = transport.send(&item).await;
        assert!(matches!(outcome, AttemptOutcome::Terminal(_)));
        // No association was opened, so nothing was transmitted.
        assert_eq!(*factory.connects.lock().unwrap(), 0);
        assert!(matches!(
            sub.try_recv(),
            Some(xrc_event_bus::ConsoleEvent::SecurityEvent { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_verifies_a_destination() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        factory.push_script(vec![rsp(command_field::C_ECHO_RSP, 0x0000)]);
        let (transport, _queue) = transport_with(factory, dir.path());
        assert!(transport.verify(&destination()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worklist_collects_pending_responses() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockFactory::default());
        let identifier = {
            let mut obj = InMemDicomObject::new_empty();
            obj.put_str(dicom_core::Tag(0x0010, 0x0010), VR::PN, "Doe^Jane");
            obj.put_str(dicom_core::Tag(0x0010, 0x0020), VR::LO, "PAT-7");
            obj.put_str(dicom_core::Tag(0x0008, 0x0050), VR::SH, "ACC-1");
            obj.put_str(dicom_core::Tag(0x0020, 0x000D), VR::UI, "1.2.3.9");
            encode_dataset(&obj, crate::negotiation::uids::EXPLICIT_VR_LE).unwrap()
        };
        factory.push_script(vec![
            crate::mock::rsp_with_data(command_field::C_FIND_RSP, 0xFF00, identifier),
            rsp(command_field::C_FIND_RSP, 0x0000),
        ]);
        let (transport, _queue) = transport_with(factory, dir.path());
        let entries = transport
            .query_worklist(
                &destination(),
                &WorklistQuery {
                    station_aet: "XRC1".to_string(),
                    modality: "DX".to_string(),
                    date: chrono::NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                },
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].patient_id, "PAT-7");
    }
}
