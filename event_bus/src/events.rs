use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an operator-visible notification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Alert,
}

/// Summary published when a study closes, consumed by RDSR generation.
///
/// Carries the hashed patient token, never the raw identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyClosedSummary {
    pub study_uid: String,
    pub patient_token: String,
    pub closed_at: DateTime<Utc>,
    pub exposure_count: usize,
    pub total_dap_cgy_cm2: f64,
}

/// Events exchanged over the console bus.
///
/// State and trigger values are carried by name, matching the journal, so
/// subscribers do not need the engine's types. None of the payloads may ever
/// contain PHI.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// A transition committed; the journal entry is durable by the time this
    /// event is observable.
    StateChanged {
        from: String,
        to: String,
        trigger: String,
        journal_id: u64,
    },
    /// A transition attempt was refused; the engine stays in `from`.
    TransitionRejected {
        from: String,
        attempted_to: String,
        trigger: String,
        failed_guards: Vec<String>,
    },
    /// A state-entry side effect failed after the transition committed.
    StateEntryFailed { state: String, detail: String },
    /// The journal cannot be written; the engine refuses to transition.
    JournalUnavailable { detail: String },
    /// An interrupted study was found at startup; the engine waits for an
    /// operator decision before touching hardware.
    RecoveryRequired {
        study_uid: String,
        last_state: String,
    },
    StudyClosed(StudyClosedSummary),
    /// A dose entry was persisted to the ledger.
    DoseRecorded {
        study_uid: String,
        dap_cgy_cm2: f64,
        cumulative_study_dap: f64,
        rejected: bool,
    },
    /// Interlock conjunction changed.
    InterlockChanged {
        all_passed: bool,
        failed: Vec<String>,
        at: DateTime<Utc>,
    },
    /// A safety abort or emergency standby fired. Always shown to the
    /// operator.
    SafetyAlert { code: String, detail: String },
    OperatorNotification {
        severity: Severity,
        code: String,
        detail: String,
    },
    /// A queued transmission reached a terminal state.
    TransmissionSucceeded {
        transmission_id: String,
        destination: String,
    },
    TransmissionFailed {
        transmission_id: String,
        destination: String,
        reason: String,
    },
    /// Storage commitment results.
    CommitConfirmed {
        transaction_uid: String,
        confirmed: usize,
        failed: usize,
    },
    CommitTimeout { transaction_uid: String },
    /// TLS or association security failure; no bytes were sent.
    SecurityEvent { destination: String, detail: String },
}

impl ConsoleEvent {
    /// Short kind name used in trace logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleEvent::StateChanged { .. } => "StateChanged",
            ConsoleEvent::TransitionRejected { .. } => "TransitionRejected",
            ConsoleEvent::StateEntryFailed { .. } => "StateEntryFailed",
            ConsoleEvent::JournalUnavailable { .. } => "JournalUnavailable",
            ConsoleEvent::RecoveryRequired { .. } => "RecoveryRequired",
            ConsoleEvent::StudyClosed(_) => "StudyClosed",
            ConsoleEvent::DoseRecorded { .. } => "DoseRecorded",
            ConsoleEvent::InterlockChanged { .. } => "InterlockChanged",
            ConsoleEvent::SafetyAlert { .. } => "SafetyAlert",
            ConsoleEvent::OperatorNotification { .. } => "OperatorNotification",
            ConsoleEvent::TransmissionSucceeded { .. } => "TransmissionSucceeded",
            ConsoleEvent::TransmissionFailed { .. } => "TransmissionFailed",
            ConsoleEvent::CommitConfirmed { .. } => "CommitConfirmed",
            ConsoleEvent::CommitTimeout { .. } => "CommitTimeout",
            ConsoleEvent::SecurityEvent { .. } => "SecurityEvent",
        }
    }
}
