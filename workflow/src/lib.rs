mod context;
mod engine;
mod state;
mod table;

pub use context::{
    AecMode, ExposureRecord, ExposureStatus, PatientInfo, Protocol, StudyContext, WorklistRef,
};
pub use engine::{
    Collaborators, CommitmentRequester, EngineConfig, RecoveryInfo, TransitionResult,
    WorkflowEngine, WorklistSource, replay_terminal_state,
};
pub use state::{Trigger, WorkflowState};
pub use table::{EXPOSURE_GUARDS, Guard, TransitionRule, lookup};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The journal cannot be written; the engine refuses to transition.
    #[error("Journal unavailable: {0}")]
    JournalUnavailable(xrc_journal::Error),
    #[error("Journal read error: {0}")]
    Journal(#[from] xrc_journal::Error),
    #[error("Protocol {field} = {value} outside the device limit {limit}")]
    ProtocolOutOfBounds {
        field: &'static str,
        value: f64,
        limit: f64,
    },
    #[error("Hardware fault: {0}")]
    Hardware(#[from] xrc_hardware::Error),
    #[error("UID generation failed: {0}")]
    Uid(#[from] xrc_common::uid::Error),
    #[error("Dose ledger failure: {0}")]
    Dose(#[from] xrc_dose::Error),
    #[error("Dataset build failure: {0}")]
    Iod(#[from] xrc_iod::Error),
    #[error("Retry queue failure: {0}")]
    Queue(#[from] xrc_retry_queue::Error),
    #[error("A recovery decision is pending; resume or clean-start first")]
    RecoveryPending,
    #[error("No recovery is pending")]
    NoRecoveryPending,
    #[error("Invalid trigger metadata: {0}")]
    InvalidMetadata(String),
}

pub type Result<T> = std::result::Result<T, Error>;
