use std::fmt;
use std::str::FromStr;

/// The ten process states. `Idle` is the terminal return.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Idle,
    WorklistSync,
    PatientSelect,
    ProtocolSelect,
    PositionAndPreview,
    ExposureTrigger,
    QcReview,
    RejectRetake,
    MppsComplete,
    PacsExport,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 10] = [
        WorkflowState::Idle,
        WorkflowState::WorklistSync,
        WorkflowState::PatientSelect,
        WorkflowState::ProtocolSelect,
        WorkflowState::PositionAndPreview,
        WorkflowState::ExposureTrigger,
        WorkflowState::QcReview,
        WorkflowState::RejectRetake,
        WorkflowState::MppsComplete,
        WorkflowState::PacsExport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Idle => "Idle",
            WorkflowState::WorklistSync => "WorklistSync",
            WorkflowState::PatientSelect => "PatientSelect",
            WorkflowState::ProtocolSelect => "ProtocolSelect",
            WorkflowState::PositionAndPreview => "PositionAndPreview",
            WorkflowState::ExposureTrigger => "ExposureTrigger",
            WorkflowState::QcReview => "QcReview",
            WorkflowState::RejectRetake => "RejectRetake",
            WorkflowState::MppsComplete => "MppsComplete",
            WorkflowState::PacsExport => "PacsExport",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown workflow state: {s}"))
    }
}

/// Event kinds the engine reacts to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    StartWorklistSync,
    PatientConfirmed,
    ProtocolSelected,
    PositioningComplete,
    ExposeRequested,
    ExposureFinished,
    ImageAccepted,
    ImageRejected,
    RetakeApproved,
    RetakeCancelled,
    StudyCompleted,
    EmergencyActivated,
    AbortRequested,
    Timeout,
}

impl Trigger {
    pub const ALL: [Trigger; 14] = [
        Trigger::StartWorklistSync,
        Trigger::PatientConfirmed,
        Trigger::ProtocolSelected,
        Trigger::PositioningComplete,
        Trigger::ExposeRequested,
        Trigger::ExposureFinished,
        Trigger::ImageAccepted,
        Trigger::ImageRejected,
        Trigger::RetakeApproved,
        Trigger::RetakeCancelled,
        Trigger::StudyCompleted,
        Trigger::EmergencyActivated,
        Trigger::AbortRequested,
        Trigger::Timeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::StartWorklistSync => "StartWorklistSync",
            Trigger::PatientConfirmed => "PatientConfirmed",
            Trigger::ProtocolSelected => "ProtocolSelected",
            Trigger::PositioningComplete => "PositioningComplete",
            Trigger::ExposeRequested => "ExposeRequested",
            Trigger::ExposureFinished => "ExposureFinished",
            Trigger::ImageAccepted => "ImageAccepted",
            Trigger::ImageRejected => "ImageRejected",
            Trigger::RetakeApproved => "RetakeApproved",
            Trigger::RetakeCancelled => "RetakeCancelled",
            Trigger::StudyCompleted => "StudyCompleted",
            Trigger::EmergencyActivated => "EmergencyActivated",
            Trigger::AbortRequested => "AbortRequested",
            Trigger::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .iter()
            .find(|trigger| trigger.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown trigger: {s}"))
    }
}
