use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use xrc_config::Destination;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CStore,
    NCreate,
    NSet,
    NAction,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionStatus {
    Pending,
    InFlight,
    Retrying,
    Succeeded,
    Failed,
}

impl TransmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransmissionStatus::Succeeded | TransmissionStatus::Failed)
    }
}

/// Content of a transmission as handed to the queue; identity and attempt
/// state are assigned on enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransmission {
    pub operation: OperationKind,
    pub destination: Destination,
    /// Opaque reference to the serialized dataset; the queue never opens it
    pub dataset_ref: PathBuf,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// Binds storage-commitment confirmations back to this item
    pub correlation_id: String,
}

/// A durable queue item.
///
/// The dataset reference and SOP Instance UID never change across retries;
/// a retry resends the original object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DicomTransmission {
    pub id: String,
    pub operation: OperationKind,
    pub destination: Destination,
    pub dataset_ref: PathBuf,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub correlation_id: String,
    /// Attempts made so far
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: DateTime<Utc>,
    pub status: TransmissionStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of one delivery attempt as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// DIMSE warning status: the object arrived, the operator is told.
    SuccessWithWarning(String),
    /// Transient condition, includes pool exhaustion and resource-full
    /// statuses; the item backs off and retries.
    Retryable(String),
    /// Dataset-level rejection or other non-recoverable condition.
    Terminal(String),
}
