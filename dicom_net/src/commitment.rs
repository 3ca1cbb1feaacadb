use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, Tag, VR};
use dicom_object::InMemDicomObject;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use xrc_config::Destination;
use xrc_event_bus::{ConsoleEvent, EventBus, Severity};
use xrc_retry_queue::{NewTransmission, OperationKind, RetryQueue};

pub const STORAGE_COMMITMENT_PUSH_MODEL_SOP_CLASS: &str = "1.2.840.10008.1.20.1";
pub const STORAGE_COMMITMENT_WELL_KNOWN_INSTANCE: &str = "1.2.840.10008.1.20.1.1";
/// N-ACTION action type for a storage commitment request.
pub const COMMITMENT_REQUEST_ACTION_TYPE: u16 = 1;

const TRANSACTION_UID: Tag = Tag(0x0008, 0x1195);
const FAILURE_REASON: Tag = Tag(0x0008, 0x1197);
const FAILED_SOP_SEQUENCE: Tag = Tag(0x0008, 0x1198);
const REFERENCED_SOP_SEQUENCE: Tag = Tag(0x0008, 0x1199);
const REFERENCED_SOP_CLASS_UID: Tag = Tag(0x0008, 0x1150);
const REFERENCED_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x1155);

/// One SOP instance covered by a commitment request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSop {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// Original dataset location, reused verbatim when the SCP reports the
    /// instance as failed and it has to be resent.
    pub dataset_ref: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommitState {
    PendingCommit,
    Confirmed,
    PartiallyFailed,
    CommitTimeout,
}

#[derive(Debug)]
struct PendingCommit {
    destination: Destination,
    sops: Vec<CommittedSop>,
    deadline: DateTime<Utc>,
    state: CommitState,
}

/// Result of one N-EVENT-REPORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub transaction_uid: String,
    pub confirmed: usize,
    pub failed: usize,
}

/// Tracks storage-commitment transactions from N-ACTION to resolution.
///
/// Confirmation arrives asynchronously; transmitted state is never reverted.
/// Instances the SCP reports as failed are re-enqueued through the retry
/// queue with their original dataset and SOP Instance UID. A transaction
/// that sees no report within the timeout moves to `CommitTimeout`, notifies
/// the operator and is retained for inspection.
pub struct CommitmentTracker {
    pending: Mutex<HashMap<String, PendingCommit>>,
    bus: Arc<EventBus>,
    queue: Arc<RetryQueue>,
    timeout: Duration,
}

impl CommitmentTracker {
    pub fn new(bus: Arc<EventBus>, queue: Arc<RetryQueue>, timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            bus,
            queue,
            timeout,
        }
    }

    /// Registers a transaction right before its N-ACTION goes out.
    pub fn register(&self, transaction_uid: &str, destination: Destination, sops: Vec<CommittedSop>) {
        let deadline = Utc::now()
            + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.pending.lock().unwrap().insert(
            transaction_uid.to_string(),
            PendingCommit {
                destination,
                sops,
                deadline,
                state: CommitState::PendingCommit,
            },
        );
    }

    pub fn state_of(&self, transaction_uid: &str) -> Option<CommitState> {
        self.pending
            .lock()
            .unwrap()
            .get(transaction_uid)
            .map(|p| p.state)
    }

    /// Action information dataset for the N-ACTION request.
    pub fn build_action_information(
        transaction_uid: &str,
        sops: &[CommittedSop],
    ) -> InMemDicomObject {
        let mut obj = InMemDicomObject::new_empty();
        obj.put_str(TRANSACTION_UID, VR::UI, transaction_uid);
        let items: Vec<InMemDicomObject> = sops
            .iter()
            .map(|sop| {
                let mut item = InMemDicomObject::new_empty();
                item.put_str(REFERENCED_SOP_CLASS_UID, VR::UI, &sop.sop_class_uid);
                item.put_str(REFERENCED_SOP_INSTANCE_UID, VR::UI, &sop.sop_instance_uid);
                item
            })
            .collect();
        obj.put(DataElement::new(
            REFERENCED_SOP_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(items),
        ));
        obj
    }

    /// Builds and queues the N-ACTION for a finished procedure.
    ///
    /// The action information dataset is written beside the spool and the
    /// transmission goes through the retry queue, so a crash between the
    /// C-STOREs and the commitment request cannot lose the request.
    pub fn request(
        &self,
        destination: Destination,
        transaction_uid: &str,
        sops: Vec<CommittedSop>,
        data_dir: &std::path::Path,
    ) -> Result<()> {
        let info = Self::build_action_information(transaction_uid, &sops);
        std::fs::create_dir_all(data_dir).map_err(|e| Error::Io(e.to_string()))?;
        let path = data_dir.join(format!("commit-{transaction_uid}.dcm"));
        let file_obj = info
            .with_meta(
                dicom_object::FileMetaTableBuilder::new()
                    .transfer_syntax(crate::negotiation::uids::EXPLICIT_VR_LE)
                    .media_storage_sop_class_uid(STORAGE_COMMITMENT_PUSH_MODEL_SOP_CLASS)
                    .media_storage_sop_instance_uid(STORAGE_COMMITMENT_WELL_KNOWN_INSTANCE),
            )
            .map_err(|e| Error::Encode(e.to_string()))?;
        file_obj
            .write_to_file(&path)
            .map_err(|e| Error::Io(e.to_string()))?;
        self.register(transaction_uid, destination.clone(), sops);
        self.queue
            .enqueue(NewTransmission {
                operation: OperationKind::NAction,
                destination,
                dataset_ref: path,
                sop_class_uid: STORAGE_COMMITMENT_PUSH_MODEL_SOP_CLASS.to_string(),
                sop_instance_uid: STORAGE_COMMITMENT_WELL_KNOWN_INSTANCE.to_string(),
                correlation_id: transaction_uid.to_string(),
            })
            .map_err(|e| Error::Io(e.to_string()))?;
        Ok(())
    }

    /// Applies an N-EVENT-REPORT information dataset.
    ///
    /// SOP instances in the referenced sequence are confirmed; instances in
    /// the failed sequence go back into the retry queue.
    pub fn handle_event_report(&self, info: &InMemDicomObject) -> Result<CommitOutcome> {
        let transaction_uid = element_str(info, TRANSACTION_UID)?;
        let confirmed_uids = sequence_instance_uids(info, REFERENCED_SOP_SEQUENCE);
        let failed_uids = sequence_instance_uids(info, FAILED_SOP_SEQUENCE);

        let mut pending = self.pending.lock().unwrap();
        let Some(commit) = pending.get_mut(&transaction_uid) else {
            warn!(
                "Commitment report for unknown transaction {}",
                transaction_uid
            );
            return Err(Error::UnknownTransaction(transaction_uid));
        };
        let mut requeued = 0usize;
        for failed_uid in &failed_uids {
            let Some(sop) = commit
                .sops
                .iter()
                .find(|s| &s.sop_instance_uid == failed_uid)
            else {
                warn!(
                    "Commitment failure for an instance outside transaction {}",
                    transaction_uid
                );
                continue;
            };
            self.queue
                .enqueue(NewTransmission {
                    operation: OperationKind::CStore,
                    destination: commit.destination.clone(),
                    dataset_ref: sop.dataset_ref.clone(),
                    sop_class_uid: sop.sop_class_uid.clone(),
                    sop_instance_uid: sop.sop_instance_uid.clone(),
                    correlation_id: transaction_uid.clone(),
                })
                .map_err(|e| Error::Io(e.to_string()))?;
            requeued += 1;
        }
        commit.state = if failed_uids.is_empty() {
            CommitState::Confirmed
        } else {
            CommitState::PartiallyFailed
        };
        info!(
            "Commitment {} resolved: {} confirmed, {} failed",
            transaction_uid,
            confirmed_uids.len(),
            failed_uids.len()
        );
        self.bus.publish(ConsoleEvent::CommitConfirmed {
            transaction_uid: transaction_uid.clone(),
            confirmed: confirmed_uids.len(),
            failed: requeued,
        });
        Ok(CommitOutcome {
            transaction_uid,
            confirmed: confirmed_uids.len(),
            failed: failed_uids.len(),
        })
    }

    /// Times out overdue transactions. Returns the affected transaction UIDs.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = vec![];
        let mut pending = self.pending.lock().unwrap();
        for (uid, commit) in pending.iter_mut() {
            if commit.state == CommitState::PendingCommit && commit.deadline <= now {
                commit.state = CommitState::CommitTimeout;
                expired.push(uid.clone());
            }
        }
        drop(pending);
        for uid in &expired {
            self.bus.publish(ConsoleEvent::CommitTimeout {
                transaction_uid: uid.clone(),
            });
            self.bus.publish(ConsoleEvent::OperatorNotification {
                severity: Severity::Warning,
                code: "COMMIT_TIMEOUT".to_string(),
                detail: format!("No storage commitment answer for transaction {uid}"),
            });
        }
        expired
    }

    /// Background task timing out overdue transactions.
    pub fn spawn_watchdog(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    return;
                }
                self.expire_due(Utc::now());
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

fn element_str(obj: &InMemDicomObject, tag: Tag) -> Result<String> {
    Ok(obj
        .element(tag)
        .map_err(|e| Error::MissingAttribute(format!("{tag:?}: {e}")))?
        .to_str()
        .map_err(|e| Error::Encode(e.to_string()))?
        .trim_end_matches('\0')
        .trim()
        .to_string())
}

fn sequence_instance_uids(obj: &InMemDicomObject, tag: Tag) -> Vec<String> {
    let Ok(element) = obj.element(tag) else {
        return vec![];
    };
    let Some(items) = element.items() else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| {
            item.element(REFERENCED_SOP_INSTANCE_UID)
                .ok()
                .and_then(|e| e.to_str().ok())
                .map(|s| s.trim_end_matches('\0').trim().to_string())
        })
        .collect()
}
